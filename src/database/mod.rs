// 存储模块
// 用户与聊天记录的持久化，提供 Postgres 与本地文件两种实现

mod file;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, StorageBackend};
use crate::models::{ChatMessage, Role, User};

pub use file::FileStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    DuplicateUser,
    #[error("unknown identity: {0}")]
    UnknownIdentity(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("DATABASE_URL is not configured")]
    MissingDatabaseUrl,
}

/// 按配置打开存储后端
pub async fn open_store(config: &Config) -> Result<Arc<dyn ChatStore>, StoreError> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(StoreError::MissingDatabaseUrl)?;
            let store = PgStore::connect(url, config.database_max_connections).await?;
            tracing::info!("Using Postgres store");
            Ok(Arc::new(store))
        }
        StorageBackend::File => {
            let store = FileStore::open(&config.data_dir).await?;
            Ok(Arc::new(store))
        }
    }
}

/// 用户与聊天记录存储
///
/// 消息只追加，不修改也不删除；`list` 按写入顺序返回。
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// 写入新用户，用户名冲突时返回 [`StoreError::DuplicateUser`]
    async fn create_user(&self, user: User) -> Result<User, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// 追加单条消息
    async fn append(
        &self,
        user_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// 原子地追加一轮对话（用户提问 + 模型回复）
    async fn append_exchange(
        &self,
        user_id: Uuid,
        prompt: &str,
        reply: &str,
    ) -> Result<(), StoreError>;

    async fn list(&self, user_id: Uuid) -> Result<Vec<ChatMessage>, StoreError>;

    /// 释放底层资源，进程退出前调用
    async fn close(&self) {}
}
