use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use uuid::Uuid;

use super::{ChatStore, StoreError};
use crate::models::{ChatMessage, Role, User};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Postgres 存储实现
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct ChatlogRow {
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatlogRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: ChatlogRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

impl PgStore {
    /// 建立连接池并确保表结构存在
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET application_name = 'deepseek_chat';")
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::debug!("Database schema ready");
        Ok(())
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

// 外键冲突说明用户不存在
fn map_insert_error(err: sqlx::Error, user_id: Uuid) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::UnknownIdentity(user_id)
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, is_guest, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, password_hash, is_guest, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(user.password_hash.as_deref())
        .bind(user.is_guest)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateUser)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, is_guest, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, is_guest, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn append(
        &self,
        user_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let row = sqlx::query_as::<_, ChatlogRow>(
            r#"
            INSERT INTO chatlog (user_id, role, content)
            VALUES ($1, $2, $3)
            RETURNING role, content, created_at
            "#,
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, user_id))?;

        row.try_into()
    }

    async fn append_exchange(
        &self,
        user_id: Uuid,
        prompt: &str,
        reply: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for (role, content) in [(Role::User, prompt), (Role::Assistant, reply)] {
            sqlx::query("INSERT INTO chatlog (user_id, role, content) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(role.as_str())
                .bind(content)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_insert_error(e, user_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self, user_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        if !self.user_exists(user_id).await? {
            return Err(StoreError::UnknownIdentity(user_id));
        }

        let rows = sqlx::query_as::<_, ChatlogRow>(
            r#"
            SELECT role, content, created_at
            FROM chatlog
            WHERE user_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
