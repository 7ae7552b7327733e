use axum::{Json, extract::State};
use axum_extra::extract::{CookieJar, WithRejection};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    models::User,
    utils::{
        GUEST_COOKIE, USER_COOKIE, guest_cookie, hash_password, is_valid_username,
        removal_cookie, user_cookie, verify_password,
    },
};

use super::model::{
    LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse,
    SessionResponse,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> Result<Json<RegisterResponse>, AppError> {
    if req.username.is_empty() || req.password.trim().is_empty() {
        return Err(AppError::Validation("用户名和密码不能为空".to_string()));
    }

    // 检查用户名格式
    if !is_valid_username(&req.username) {
        return Err(AppError::Validation(
            "用户名格式无效，只允许使用字母、数字和 _ - . @，最长64个字符".to_string(),
        ));
    }

    let password = req.password;
    let cost = state.config.bcrypt_cost;
    let password_hash =
        tokio::task::spawn_blocking(move || hash_password(&password, cost)).await??;

    let user = state
        .store
        .create_user(User::registered(&req.username, password_hash))
        .await?;
    tracing::info!("Registered user: {}", user.username);

    Ok(Json(RegisterResponse {
        message: "注册成功".to_string(),
        id: user.id,
    }))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, AppError>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::Validation("用户名和密码不能为空".to_string()));
    }

    let user = state
        .store
        .find_user_by_username(&req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    // 访客账号没有密码，不能使用密码登录
    let Some(hash) = user.password_hash.clone() else {
        return Err(AppError::InvalidCredentials);
    };

    let password = req.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await??;
    if !valid {
        tracing::info!("Rejected login for user: {}", user.username);
        return Err(AppError::InvalidCredentials);
    }

    tracing::info!("User logged in: {}", user.username);
    let jar = jar.add(user_cookie(&user.username));

    Ok((
        jar,
        Json(LoginResponse {
            message: "登录成功".to_string(),
            user: user.username,
            user_id: user.id,
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let jar = jar
        .remove(removal_cookie(USER_COOKIE))
        .remove(removal_cookie(GUEST_COOKIE));

    (
        jar,
        Json(MessageResponse {
            message: "已退出登录".to_string(),
        }),
    )
}

/// 访客会话：复用有效的 `userId` cookie，否则创建新的访客
#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    let existing = match jar
        .get(GUEST_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
    {
        Some(id) => state
            .store
            .find_user_by_id(id)
            .await?
            .filter(|user| user.is_guest),
        None => None,
    };

    let (user, message) = match existing {
        Some(user) => (user, "会话已恢复"),
        None => {
            let user = state.store.create_user(User::guest()).await?;
            tracing::info!("Created guest session: {}", user.id);
            (user, "会话已创建")
        }
    };

    // 每次访问都刷新 cookie 有效期
    let jar = jar.add(guest_cookie(user.id, state.config.guest_session_lifetime()));

    Ok((
        jar,
        Json(SessionResponse {
            message: message.to_string(),
            user_id: user.id,
        }),
    ))
}
