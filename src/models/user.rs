use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// 访客账号没有密码
    pub password_hash: Option<String>,
    pub is_guest: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn registered(username: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: Some(password_hash),
            is_guest: false,
            created_at: Utc::now(),
        }
    }

    pub fn guest() -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            username: format!("guest-{}", id.simple()),
            password_hash: None,
            is_guest: true,
            created_at: Utc::now(),
        }
    }
}

/// 请求中解析出的当前身份
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
        }
    }
}
