//! Server database: the records pushed by clients, the message archive and
//! the per-session archive watermarks.
//!
//! Archived session messages live next to pushed messages but are flagged
//! `archived`; they are served per session and never appear in a client pull.
//!
//! One [`rusqlite::Connection`] behind a mutex; every query runs on the
//! blocking pool through [`Db::call`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use hearth_shared::protocol::{PullResponse, RemoteChat, RemoteDocument, RemoteMessage};
use hearth_shared::types::EntityKind;

use crate::error::ServerError;

const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id          TEXT PRIMARY KEY NOT NULL,
    title       TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    visibility  TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(updated_at);

-- Pushed messages and archived session messages share this table; for the
-- latter chat_id holds the session id and archived = 1.
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,
    chat_id     TEXT NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    archived    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
CREATE INDEX IF NOT EXISTS idx_messages_updated ON messages(updated_at);

CREATE TABLE IF NOT EXISTS documents (
    id          TEXT PRIMARY KEY NOT NULL,
    title       TEXT NOT NULL,
    kind        TEXT NOT NULL,
    content     TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at);

CREATE TABLE IF NOT EXISTS archive_watermarks (
    session_id         TEXT PRIMARY KEY NOT NULL,
    timestamp_ms       INTEGER NOT NULL,
    seen_at_timestamp  INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL
);
";

/// Archive progress of one session: everything scored below `timestamp_ms`
/// is archived, plus the first `seen_at_timestamp` entries scored exactly
/// `timestamp_ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    pub timestamp_ms: i64,
    pub seen_at_timestamp: u64,
}

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub async fn open(path: PathBuf) -> Result<Self, ServerError> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, ServerError> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            migrate(&conn)?;
            info!(path = %path.display(), "Server database opened");
            Ok(conn)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Database open task failed: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, ServerError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, R>(&self, f: F) -> Result<R, ServerError>
    where
        F: FnOnce(&mut Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ServerError::Internal("Database mutex poisoned".into()))?;
            f(&mut guard).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Database task failed: {e}")))?
    }

    // -- sync records --------------------------------------------------------

    /// Upsert a chat.  Returns `false` when an identical row was already
    /// stored, in which case `updated_at` is left alone.
    pub async fn put_chat(&self, chat: RemoteChat) -> Result<bool, ServerError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO chats (id, title, user_id, visibility, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    user_id = excluded.user_id,
                    visibility = excluded.visibility,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                 WHERE chats.title IS NOT excluded.title
                    OR chats.user_id IS NOT excluded.user_id
                    OR chats.visibility IS NOT excluded.visibility
                    OR chats.created_at IS NOT excluded.created_at",
                params![
                    chat.id.to_string(),
                    chat.title,
                    chat.user_id,
                    chat.visibility.as_str(),
                    chat.created_at.timestamp_millis(),
                    now_ms(),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn put_message(&self, message: RemoteMessage) -> Result<bool, ServerError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO messages (id, chat_id, role, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    chat_id = excluded.chat_id,
                    role = excluded.role,
                    content = excluded.content,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                 WHERE messages.chat_id IS NOT excluded.chat_id
                    OR messages.role IS NOT excluded.role
                    OR messages.content IS NOT excluded.content
                    OR messages.created_at IS NOT excluded.created_at",
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    message.created_at.timestamp_millis(),
                    now_ms(),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn put_document(&self, document: RemoteDocument) -> Result<bool, ServerError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO documents (id, title, kind, content, user_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    kind = excluded.kind,
                    content = excluded.content,
                    user_id = excluded.user_id,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                 WHERE documents.title IS NOT excluded.title
                    OR documents.kind IS NOT excluded.kind
                    OR documents.content IS NOT excluded.content
                    OR documents.user_id IS NOT excluded.user_id
                    OR documents.created_at IS NOT excluded.created_at",
                params![
                    document.id.to_string(),
                    document.title,
                    document.kind.as_str(),
                    document.content,
                    document.user_id,
                    document.created_at.timestamp_millis(),
                    now_ms(),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Delete one record.  Deleting a chat also deletes its messages.
    /// Returns `false` when the record did not exist.
    pub async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, ServerError> {
        self.call(move |conn| {
            let id = id.to_string();
            let tx = conn.transaction()?;
            let removed = match kind {
                EntityKind::Chat => {
                    let messages =
                        tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![id])?;
                    let removed = tx.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
                    debug!(chat = %id, messages, "Deleted chat");
                    removed
                }
                EntityKind::Message => {
                    tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?
                }
                EntityKind::Document => {
                    tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?
                }
            };
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    /// Everything pushed or updated strictly after `since` (epoch ms).
    /// Archived session messages are left out.
    pub async fn changes_since(&self, since: i64) -> Result<PullResponse, ServerError> {
        self.call(move |conn| {
            // Reported one ms behind the clock so rows stamped later in the
            // current millisecond are still returned by the next pull.
            let server_time = now_ms() - 1;

            let chats = conn
                .prepare(
                    "SELECT id, title, user_id, visibility, created_at FROM chats
                     WHERE updated_at > ?1 ORDER BY updated_at",
                )?
                .query_map(params![since], chat_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let messages = conn
                .prepare(
                    "SELECT id, chat_id, role, content, created_at FROM messages
                     WHERE updated_at > ?1 AND archived = 0 ORDER BY updated_at",
                )?
                .query_map(params![since], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let documents = conn
                .prepare(
                    "SELECT id, title, kind, content, user_id, created_at FROM documents
                     WHERE updated_at > ?1 ORDER BY updated_at",
                )?
                .query_map(params![since], document_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(PullResponse {
                chats,
                messages,
                documents,
                server_time,
            })
        })
        .await
    }

    // -- archive -------------------------------------------------------------

    pub async fn watermark(&self, session_id: Uuid) -> Result<Watermark, ServerError> {
        self.call(move |conn| {
            let mark = conn
                .query_row(
                    "SELECT timestamp_ms, seen_at_timestamp FROM archive_watermarks
                     WHERE session_id = ?1",
                    params![session_id.to_string()],
                    |row| {
                        Ok(Watermark {
                            timestamp_ms: row.get(0)?,
                            seen_at_timestamp: row.get::<_, i64>(1)?.max(0) as u64,
                        })
                    },
                )
                .optional()?;
            Ok(mark.unwrap_or_default())
        })
        .await
    }

    /// Insert archived messages (existing ids are left untouched) and move
    /// the session watermark, atomically.  Returns the rows inserted.
    pub async fn archive_batch(
        &self,
        session_id: Uuid,
        messages: Vec<RemoteMessage>,
        watermark: Watermark,
    ) -> Result<u64, ServerError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let now = now_ms();
            let mut inserted = 0u64;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (id, chat_id, role, content, created_at, updated_at, archived)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                     ON CONFLICT(id) DO NOTHING",
                )?;
                for m in &messages {
                    inserted += stmt.execute(params![
                        m.id.to_string(),
                        m.chat_id.to_string(),
                        m.role.as_str(),
                        m.content,
                        m.created_at.timestamp_millis(),
                        now,
                    ])? as u64;
                }
            }
            tx.execute(
                "INSERT INTO archive_watermarks (session_id, timestamp_ms, seen_at_timestamp, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                    timestamp_ms = excluded.timestamp_ms,
                    seen_at_timestamp = excluded.seen_at_timestamp,
                    updated_at = excluded.updated_at",
                params![
                    session_id.to_string(),
                    watermark.timestamp_ms,
                    watermark.seen_at_timestamp as i64,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    /// Archived (or pushed) messages of one chat or session, oldest first.
    pub async fn messages_for(&self, chat_id: Uuid) -> Result<Vec<RemoteMessage>, ServerError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, role, content, created_at FROM messages
                 WHERE chat_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt
                .query_map(params![chat_id.to_string()], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current < 1 {
        info!("Applying server schema v1");
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn millis_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteChat> {
    Ok(RemoteChat {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        user_id: row.get(2)?,
        visibility: parsed_col(row, 3)?,
        created_at: millis_col(row, 4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteMessage> {
    Ok(RemoteMessage {
        id: uuid_col(row, 0)?,
        chat_id: uuid_col(row, 1)?,
        role: parsed_col(row, 2)?,
        content: row.get(3)?,
        created_at: millis_col(row, 4)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteDocument> {
    Ok(RemoteDocument {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        kind: parsed_col(row, 2)?,
        content: row.get(3)?,
        user_id: row.get(4)?,
        created_at: millis_col(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shared::types::{DocumentKind, Role, Visibility};

    fn chat() -> RemoteChat {
        RemoteChat {
            id: Uuid::new_v4(),
            title: "Plans".into(),
            user_id: "user-1".into(),
            visibility: Visibility::Private,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn message(chat_id: Uuid, content: &str) -> RemoteMessage {
        RemoteMessage {
            id: Uuid::new_v4(),
            chat_id,
            role: Role::User,
            content: content.into(),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_500).unwrap(),
        }
    }

    #[tokio::test]
    async fn identical_push_is_not_reapplied() {
        let db = Db::open_in_memory().unwrap();
        let c = chat();
        assert!(db.put_chat(c.clone()).await.unwrap());
        assert!(!db.put_chat(c.clone()).await.unwrap());

        let changed = RemoteChat {
            title: "Renamed".into(),
            ..c.clone()
        };
        assert!(db.put_chat(changed).await.unwrap());

        let pulled = db.changes_since(0).await.unwrap();
        assert_eq!(pulled.chats.len(), 1);
        assert_eq!(pulled.chats[0].title, "Renamed");
    }

    #[tokio::test]
    async fn changes_since_filters_by_update_time() {
        let db = Db::open_in_memory().unwrap();
        let c = chat();
        db.put_chat(c.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let first = db.changes_since(0).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.put_document(RemoteDocument {
            id: Uuid::new_v4(),
            title: "Notes".into(),
            kind: DocumentKind::Text,
            content: "body".into(),
            user_id: "user-1".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let second = db.changes_since(first.server_time).await.unwrap();
        assert!(second.chats.is_empty());
        assert_eq!(second.documents.len(), 1);
    }

    #[tokio::test]
    async fn chat_delete_cascades_to_messages() {
        let db = Db::open_in_memory().unwrap();
        let c = chat();
        db.put_chat(c.clone()).await.unwrap();
        db.put_message(message(c.id, "one")).await.unwrap();
        db.put_message(message(c.id, "two")).await.unwrap();

        assert!(db.delete(EntityKind::Chat, c.id).await.unwrap());
        assert!(db.messages_for(c.id).await.unwrap().is_empty());
        assert!(!db.delete(EntityKind::Chat, c.id).await.unwrap());
    }

    #[tokio::test]
    async fn archive_batch_skips_existing_ids() {
        let db = Db::open_in_memory().unwrap();
        let session = Uuid::new_v4();
        let m = message(session, "hello");
        let mark = Watermark {
            timestamp_ms: 10,
            seen_at_timestamp: 1,
        };

        assert_eq!(db.archive_batch(session, vec![m.clone()], mark).await.unwrap(), 1);
        assert_eq!(db.archive_batch(session, vec![m], mark).await.unwrap(), 0);
        assert_eq!(db.watermark(session).await.unwrap(), mark);
        assert_eq!(db.messages_for(session).await.unwrap().len(), 1);
        assert_eq!(db.watermark(Uuid::new_v4()).await.unwrap(), Watermark::default());
    }

    #[tokio::test]
    async fn archived_messages_stay_out_of_client_pulls() {
        let db = Db::open_in_memory().unwrap();
        let c = chat();
        db.put_chat(c.clone()).await.unwrap();
        let pushed = message(c.id, "pushed by a client");
        db.put_message(pushed.clone()).await.unwrap();

        let session = Uuid::new_v4();
        let archived = message(session, "from an active session");
        db.archive_batch(session, vec![archived.clone()], Watermark::default())
            .await
            .unwrap();

        let pulled = db.changes_since(0).await.unwrap();
        assert_eq!(pulled.messages, vec![pushed]);
        assert_eq!(db.messages_for(session).await.unwrap(), vec![archived]);
    }

    #[tokio::test]
    async fn reopening_keeps_schema_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.db");
        let c = chat();
        {
            let db = Db::open(path.clone()).await.unwrap();
            db.put_chat(c.clone()).await.unwrap();
        }
        let db = Db::open(path).await.unwrap();
        assert_eq!(db.changes_since(0).await.unwrap().chats, vec![c]);
    }
}
