use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use bcrypt::{hash, verify};
use uuid::Uuid;

/// 已注册用户的身份 cookie，值为用户名
pub const USER_COOKIE: &str = "user";
/// 访客会话的身份 cookie，值为访客 id
pub const GUEST_COOKIE: &str = "userId";

const MAX_USERNAME_LEN: usize = 64;

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

/// bcrypt 校验内部使用常量时间比较
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// 用户名会直接写入 cookie，只允许字母、数字和 `_ - . @`
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
}

fn identity_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub fn user_cookie(username: &str) -> Cookie<'static> {
    identity_cookie(USER_COOKIE, username.to_string())
}

pub fn guest_cookie(user_id: Uuid, lifetime: Duration) -> Cookie<'static> {
    let mut cookie = identity_cookie(GUEST_COOKIE, user_id.to_string());
    let max_age = time::Duration::try_from(lifetime).unwrap_or(time::Duration::MAX);
    cookie.set_max_age(max_age);
    cookie
}

/// 用于 `CookieJar::remove`，path 必须与写入时一致
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

pub mod error_codes {
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const DUPLICATE_USER: i32 = 1001;
    pub const INVALID_CREDENTIALS: i32 = 1002;
    pub const UNAUTHENTICATED: i32 = 1003;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const MODEL_UNAVAILABLE: i32 = 5001;
}
