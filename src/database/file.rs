use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ChatStore, StoreError};
use crate::models::{ChatMessage, Role, User};

const USERS_FILE: &str = "users.json";
const HISTORY_DIR: &str = "history";

/// 本地文件存储实现
///
/// 目录结构：
/// - `users.json`：全部用户，每次注册整体重写（临时文件 + rename）
/// - `history/<user_id>.jsonl`：每个身份一份追加日志，一行一条消息
///
/// 同一身份的写入由各自的互斥锁串行化，不同身份互不影响。
pub struct FileStore {
    root: PathBuf,
    users: Mutex<Vec<User>>,
    history_locks: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(HISTORY_DIR)).await?;

        let users: Vec<User> = match fs::read(root.join(USERS_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "Opened file store at {} with {} users",
            root.display(),
            users.len()
        );

        Ok(Self {
            root,
            users: Mutex::new(users),
            history_locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn history_path(&self, user_id: Uuid) -> PathBuf {
        self.root
            .join(HISTORY_DIR)
            .join(format!("{}.jsonl", user_id))
    }

    fn history_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self
            .history_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(user_id).or_default().clone()
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        if self.users.lock().await.iter().any(|u| u.id == user_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownIdentity(user_id))
        }
    }

    async fn write_users(&self, users: &[User]) -> Result<(), StoreError> {
        let path = self.root.join(USERS_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(users)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn append_messages(
        &self,
        user_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<(), StoreError> {
        self.ensure_user(user_id).await?;

        let mut buf = Vec::new();
        for message in messages {
            serde_json::to_writer(&mut buf, message)?;
            buf.push(b'\n');
        }

        let lock = self.history_lock(user_id);
        let _guard = lock.lock().await;

        let path = self.history_path(user_id);
        // 上次写入中断留下的半行单独成行，不能与新记录拼在一起
        if has_torn_tail(&path).await? {
            tracing::warn!("Closing torn trailing line in history of {}", user_id);
            buf.insert(0, b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

/// 文件非空且最后一个字节不是换行
async fn has_torn_tail(path: &Path) -> Result<bool, StoreError> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }

    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl ChatStore for FileStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::DuplicateUser);
        }

        users.push(user.clone());
        if let Err(e) = self.write_users(&users).await {
            users.pop();
            return Err(e);
        }

        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn append(
        &self,
        user_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let message = ChatMessage::new(role, content);
        self.append_messages(user_id, std::slice::from_ref(&message))
            .await?;
        Ok(message)
    }

    async fn append_exchange(
        &self,
        user_id: Uuid,
        prompt: &str,
        reply: &str,
    ) -> Result<(), StoreError> {
        let messages = [
            ChatMessage::new(Role::User, prompt),
            ChatMessage::new(Role::Assistant, reply),
        ];
        self.append_messages(user_id, &messages).await
    }

    async fn list(&self, user_id: Uuid) -> Result<Vec<ChatMessage>, StoreError> {
        self.ensure_user(user_id).await?;

        let lock = self.history_lock(user_id);
        let _guard = lock.lock().await;

        let raw = match fs::read_to_string(self.history_path(user_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    // 进程崩溃可能留下半行
                    tracing::warn!(
                        "Skipping unreadable history line {} for {}: {}",
                        lineno + 1,
                        user_id,
                        e
                    );
                }
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use futures_util::future::join_all;
    use tempfile::TempDir;

    use super::*;

    async fn store_with_user(username: &str) -> (TempDir, Arc<FileStore>, User) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let user = store
            .create_user(User::registered(username, "hash".into()))
            .await
            .unwrap();
        (dir, Arc::new(store), user)
    }

    #[tokio::test]
    async fn list_returns_messages_in_append_order() {
        let (_dir, store, user) = store_with_user("alice").await;

        store.append(user.id, Role::User, "hi").await.unwrap();
        store.append(user.id, Role::Assistant, "hello").await.unwrap();
        store
            .append_exchange(user.id, "how are you?", "fine")
            .await
            .unwrap();

        let history = store.list(user.id).await.unwrap();
        let pairs: Vec<_> = history
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Role::User, "hi"),
                (Role::Assistant, "hello"),
                (Role::User, "how are you?"),
                (Role::Assistant, "fine"),
            ]
        );
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn empty_history_for_new_user() {
        let (_dir, store, user) = store_with_user("bob").await;
        assert!(store.list(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_identity_is_rejected() {
        let (_dir, store, _user) = store_with_user("carol").await;
        let stranger = Uuid::new_v4();

        let err = store.append(stranger, Role::User, "hi").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentity(id) if id == stranger));

        let err = store.list(stranger).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentity(_)));

        assert!(!store.history_path(stranger).exists());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let (_dir, store, _user) = store_with_user("dave").await;

        let err = store
            .create_user(User::registered("dave", "other".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUser));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let guest = User::guest();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store
                .create_user(User::registered("erin", "hash".into()))
                .await
                .unwrap();
            store.create_user(guest.clone()).await.unwrap();
            store.append_exchange(guest.id, "q", "a").await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let erin = store.find_user_by_username("erin").await.unwrap().unwrap();
        assert_eq!(erin.password_hash.as_deref(), Some("hash"));

        let reloaded = store.find_user_by_id(guest.id).await.unwrap().unwrap();
        assert!(reloaded.is_guest);
        assert_eq!(store.list(guest.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn skips_truncated_trailing_line() {
        let (_dir, store, user) = store_with_user("frank").await;
        store.append_exchange(user.id, "q", "a").await.unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(store.history_path(user.id))
            .await
            .unwrap();
        file.write_all(b"{\"role\":\"us").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(store.list(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn append_after_truncated_line_keeps_whole_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let user = User::registered("heidi", "hash".into());
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.create_user(user.clone()).await.unwrap();
            store.append_exchange(user.id, "q1", "a1").await.unwrap();

            let mut file = OpenOptions::new()
                .append(true)
                .open(store.history_path(user.id))
                .await
                .unwrap();
            file.write_all(b"{\"role\":\"us").await.unwrap();
            file.flush().await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        store.append_exchange(user.id, "q2", "a2").await.unwrap();
        store.append_exchange(user.id, "q3", "a3").await.unwrap();

        let history = store.list(user.id).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2", "q3", "a3"]);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_session_lose_nothing() {
        let (_dir, store, user) = store_with_user("grace").await;
        let user_id = user.id;

        let tasks = (0..40).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append_exchange(user_id, &format!("q{}", i), &format!("a{}", i))
                    .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let history = store.list(user.id).await.unwrap();
        assert_eq!(history.len(), 80);

        // 每轮对话的两条消息必须相邻
        let mut seen = HashSet::new();
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            let n = pair[0].content.trim_start_matches('q');
            assert_eq!(pair[1].content, format!("a{}", n));
            assert!(seen.insert(n.to_string()));
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());

        let mut guests = Vec::new();
        for _ in 0..8 {
            guests.push(store.create_user(User::guest()).await.unwrap());
        }

        let mut tasks = Vec::new();
        for guest in &guests {
            for i in 0..10 {
                let store = store.clone();
                let id = guest.id;
                tasks.push(tokio::spawn(async move {
                    store.append(id, Role::User, &format!("{}:{}", id, i)).await
                }));
            }
        }
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        for guest in &guests {
            let history = store.list(guest.id).await.unwrap();
            assert_eq!(history.len(), 10);
            let prefix = format!("{}:", guest.id);
            assert!(history.iter().all(|m| m.content.starts_with(&prefix)));
        }
    }
}
