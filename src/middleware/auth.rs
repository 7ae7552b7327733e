use axum::{
    Extension,
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::{
    AppState,
    database::{ChatStore, StoreError},
    error::AppError,
    models::Identity,
    utils::{GUEST_COOKIE, USER_COOKIE},
};

/// 根据 cookie 解析当前身份并放入请求扩展
///
/// 未携带或无法识别的 cookie 不会被拒绝，由各个处理函数决定是否要求登录。
pub async fn resolve_identity(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(identity) = identify(state.store.as_ref(), &jar).await? {
        tracing::debug!("Resolved identity: {}", identity.username);
        req.extensions_mut().insert(identity);
    }

    Ok(next.run(req).await)
}

/// 优先使用注册用户 cookie，其次是访客 cookie
pub async fn identify(
    store: &dyn ChatStore,
    jar: &CookieJar,
) -> Result<Option<Identity>, StoreError> {
    if let Some(cookie) = jar.get(USER_COOKIE) {
        if let Some(user) = store.find_user_by_username(cookie.value()).await? {
            if !user.is_guest {
                return Ok(Some(Identity::from(&user)));
            }
        }
    }

    if let Some(cookie) = jar.get(GUEST_COOKIE) {
        if let Ok(id) = Uuid::parse_str(cookie.value()) {
            if let Some(user) = store.find_user_by_id(id).await? {
                if user.is_guest {
                    return Ok(Some(Identity::from(&user)));
                }
            }
        }
    }

    Ok(None)
}

pub fn require_identity(identity: Option<Extension<Identity>>) -> Result<Identity, AppError> {
    identity
        .map(|Extension(identity)| identity)
        .ok_or(AppError::Unauthenticated)
}
