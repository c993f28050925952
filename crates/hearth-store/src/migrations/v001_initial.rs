//! v001 -- Initial schema creation.
//!
//! Creates the record tables (`chats`, `messages`, `documents`), the upload
//! queue tables (`files`, `uploads`) and the sync bookkeeping tables
//! (`tombstones`, `kv`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    title      TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    visibility TEXT NOT NULL,                 -- 'private' | 'public'
    created_at INTEGER NOT NULL,              -- epoch millis
    synced_at  INTEGER,                       -- epoch millis, NULL = never
    is_dirty   INTEGER NOT NULL DEFAULT 1     -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_chats_dirty ON chats(is_dirty);

-- ----------------------------------------------------------------
-- Messages (chat_id is not a foreign key: cascade is done by the facade)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,
    chat_id    TEXT NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    synced_at  INTEGER,
    is_dirty   INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_dirty ON messages(is_dirty);

-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    id         TEXT PRIMARY KEY NOT NULL,
    title      TEXT NOT NULL,
    kind       TEXT NOT NULL,                 -- 'text' | 'code' | 'sheet' | 'image'
    content    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    synced_at  INTEGER,
    is_dirty   INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_documents_dirty ON documents(is_dirty);

-- ----------------------------------------------------------------
-- Files (raw payloads of queued uploads)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    id         TEXT PRIMARY KEY NOT NULL,
    bytes      BLOB NOT NULL,
    name       TEXT NOT NULL,
    mime_type  TEXT NOT NULL,
    size       INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Upload queue
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS uploads (
    id         TEXT PRIMARY KEY NOT NULL,
    file_id    TEXT NOT NULL,
    name       TEXT NOT NULL,
    mime_type  TEXT NOT NULL,
    size       INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    status     TEXT NOT NULL,                 -- pending | uploading | success | error
    remote_url TEXT,
    last_error TEXT,
    attempts   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status, created_at);

-- ----------------------------------------------------------------
-- Deletions waiting to be pushed
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tombstones (
    kind       TEXT NOT NULL,                 -- 'chat' | 'message' | 'document'
    id         TEXT NOT NULL,
    deleted_at INTEGER NOT NULL,
    PRIMARY KEY (kind, id)
);

-- ----------------------------------------------------------------
-- Small key/value settings (pull checkpoint, ...)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
