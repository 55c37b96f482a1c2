//! SQLite Conversation Store - rusqlite 기반 세션 저장소
//!
//! 세션 메시지는 JSON 텍스트 컬럼으로 저장합니다.
//! 저장 위치: ~/.docchat-rag/history.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::{ChatSession, ChatSummary, ChatTurn, ConversationStore};

const SESSION_COLUMNS: &str = "id, user_id, title, messages, created_at, updated_at";

/// SQLite 대화 저장소
///
/// rusqlite 호출은 블로킹이므로 비동기 메서드는 `spawn_blocking`에서 실행됩니다.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteConversationStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 블로킹 DB 작업을 전용 스레드에서 실행
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteConversationStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .context("Conversation store task failed")?
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create chats table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at)",
            [],
        )
        .context("Failed to create user index")?;

        tracing::debug!("Conversation store initialized at {:?}", self.db_path);
        Ok(())
    }

    fn create(&self, user_id: &str, title: &str, messages: &[ChatTurn]) -> Result<ChatSession> {
        let conn = self.lock()?;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(messages).context("Failed to encode messages")?;

        conn.execute(
            "INSERT INTO chats (id, user_id, title, messages, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, user_id, title, encoded, format_datetime(now)],
        )
        .context("Failed to insert chat")?;

        tracing::info!("Created chat {} for user {} ({} messages)", id, user_id, messages.len());

        Ok(ChatSession {
            id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            messages: messages.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    fn fetch(&self, user_id: &str, chat_id: &str) -> Result<Option<ChatSession>> {
        let conn = self.lock()?;
        fetch_session(&conn, user_id, chat_id)
    }

    fn update_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        messages: &[ChatTurn],
    ) -> Result<Option<ChatSession>> {
        let conn = self.lock()?;
        let encoded = serde_json::to_string(messages).context("Failed to encode messages")?;

        let rows = conn
            .execute(
                "UPDATE chats SET messages = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![encoded, format_datetime(Utc::now()), chat_id, user_id],
            )
            .context("Failed to update chat messages")?;

        if rows == 0 {
            return Ok(None);
        }
        fetch_session(&conn, user_id, chat_id)
    }

    fn update_title(&self, user_id: &str, chat_id: &str, title: &str) -> Result<Option<ChatSession>> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![title, format_datetime(Utc::now()), chat_id, user_id],
            )
            .context("Failed to update chat title")?;

        if rows == 0 {
            return Ok(None);
        }
        fetch_session(&conn, user_id, chat_id)
    }

    fn list(&self, user_id: &str) -> Result<Vec<ChatSummary>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, updated_at FROM chats
             WHERE user_id = ?1
             ORDER BY updated_at DESC",
        )?;

        let summaries = stmt
            .query_map(params![user_id], |row| {
                Ok(ChatSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(summaries)
    }

    fn remove(&self, user_id: &str, chat_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM chats WHERE id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
        )?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn save_session(
        &self,
        user_id: &str,
        chat_id: Option<&str>,
        title: &str,
        messages: &[ChatTurn],
    ) -> Result<ChatSession> {
        let user_id = user_id.to_string();
        let chat_id = chat_id.map(str::to_string);
        let title = title.to_string();
        let messages = messages.to_vec();

        self.blocking(move |store| match chat_id {
            Some(id) => store
                .update_messages(&user_id, &id, &messages)?
                .ok_or_else(|| anyhow::anyhow!("Chat {} not found for user {}", id, user_id)),
            None => store.create(&user_id, &title, &messages),
        })
        .await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<ChatSummary>> {
        let user_id = user_id.to_string();
        self.blocking(move |store| store.list(&user_id)).await
    }

    async fn get_session(&self, user_id: &str, chat_id: &str) -> Result<Option<ChatSession>> {
        let (user_id, chat_id) = (user_id.to_string(), chat_id.to_string());
        self.blocking(move |store| store.fetch(&user_id, &chat_id)).await
    }

    async fn rename_session(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
    ) -> Result<Option<ChatSession>> {
        let (user_id, chat_id, title) = (user_id.to_string(), chat_id.to_string(), title.to_string());
        self.blocking(move |store| store.update_title(&user_id, &chat_id, &title))
            .await
    }

    async fn replace_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        messages: &[ChatTurn],
    ) -> Result<Option<ChatSession>> {
        let (user_id, chat_id) = (user_id.to_string(), chat_id.to_string());
        let messages = messages.to_vec();
        self.blocking(move |store| store.update_messages(&user_id, &chat_id, &messages))
            .await
    }

    async fn delete_session(&self, user_id: &str, chat_id: &str) -> Result<bool> {
        let (user_id, chat_id) = (user_id.to_string(), chat_id.to_string());
        self.blocking(move |store| store.remove(&user_id, &chat_id)).await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn fetch_session(conn: &Connection, user_id: &str, chat_id: &str) -> Result<Option<ChatSession>> {
    let sql = format!(
        "SELECT {} FROM chats WHERE id = ?1 AND user_id = ?2",
        SESSION_COLUMNS
    );

    let row = conn
        .query_row(&sql, params![chat_id, user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .optional()
        .context("Failed to fetch chat")?;

    let Some((id, user_id, title, messages, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let messages: Vec<ChatTurn> =
        serde_json::from_str(&messages).context("Failed to decode stored messages")?;

    Ok(Some(ChatSession {
        id,
        user_id,
        title,
        messages,
        created_at: parse_datetime(created_at),
        updated_at: parse_datetime(updated_at),
    }))
}

/// 고정 폭 RFC3339 (문자열 정렬 = 시간 정렬)
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteConversationStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("history.db");
        let store = SqliteConversationStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::user("What is the refund policy?"),
            ChatTurn::assistant("30 days.", vec!["Refunds within 30 days".to_string()]),
        ]
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (_dir, store) = create_test_store();

        let created = store.save_session("alice", None, "Refunds", &turns()).await.unwrap();
        assert!(!created.id.is_empty());

        let fetched = store.get_session("alice", &created.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Refunds");
        assert_eq!(fetched.messages, turns());
        assert_eq!(fetched.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_other_user_cannot_access() {
        let (_dir, store) = create_test_store();
        let created = store.save_session("alice", None, "Mine", &turns()).await.unwrap();

        assert!(store.get_session("bob", &created.id).await.unwrap().is_none());
        assert!(store.rename_session("bob", &created.id, "Stolen").await.unwrap().is_none());
        assert!(store.replace_messages("bob", &created.id, &[]).await.unwrap().is_none());
        assert!(!store.delete_session("bob", &created.id).await.unwrap());
        assert!(store
            .save_session("bob", Some(&created.id), "x", &turns())
            .await
            .is_err());

        // 원본은 그대로
        let still = store.get_session("alice", &created.id).await.unwrap().unwrap();
        assert_eq!(still.title, "Mine");
        assert_eq!(still.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_append_to_existing_session() {
        let (_dir, store) = create_test_store();
        let created = store.save_session("alice", None, "First", &turns()).await.unwrap();

        let mut longer = turns();
        longer.push(ChatTurn::user("And exchanges?"));
        longer.push(ChatTurn::assistant("Also 30 days.", vec![]));

        let updated = store
            .save_session("alice", Some(&created.id), "ignored", &longer)
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "First");
        assert_eq!(updated.messages, longer);
    }

    #[tokio::test]
    async fn test_list_rename_delete() {
        let (_dir, store) = create_test_store();

        let a = store.save_session("alice", None, "A", &turns()).await.unwrap();
        let _b = store.save_session("alice", None, "B", &turns()).await.unwrap();
        store.save_session("bob", None, "C", &turns()).await.unwrap();

        let list = store.list_sessions("alice").await.unwrap();
        assert_eq!(list.len(), 2);

        let renamed = store.rename_session("alice", &a.id, "Renamed").await.unwrap().unwrap();
        assert_eq!(renamed.title, "Renamed");

        // 방금 수정한 세션이 맨 앞
        let list = store.list_sessions("alice").await.unwrap();
        assert_eq!(list[0].id, a.id);

        assert!(store.delete_session("alice", &a.id).await.unwrap());
        assert!(store.get_session("alice", &a.id).await.unwrap().is_none());
        assert_eq!(store.list_sessions("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_messages() {
        let (_dir, store) = create_test_store();
        let created = store.save_session("alice", None, "T", &turns()).await.unwrap();

        let replaced = store
            .replace_messages("alice", &created.id, &[ChatTurn::user("only one")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.messages.len(), 1);
        assert_eq!(replaced.messages[0].content, "only one");
    }

    #[tokio::test]
    async fn test_waiting_on_database_does_not_stall_runtime() {
        let (_dir, store) = create_test_store();

        // 다른 스레드가 연결을 잠시 점유
        let conn = Arc::clone(&store.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(400));
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let ticker = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            started.elapsed()
        };
        let turns = turns();
        let (saved, ticked_after) =
            tokio::join!(store.save_session("alice", None, "T", &turns), ticker);

        assert!(saved.is_ok());
        assert!(ticked_after < Duration::from_millis(300), "runtime stalled for {:?}", ticked_after);
        holder.join().unwrap();
    }
}
