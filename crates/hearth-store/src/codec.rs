//! Mapping layer between domain records and their storage rows.
//!
//! Storage engines only ever see the `*Row` structs: ids as strings,
//! timestamps as epoch milliseconds and flags as `0`/`1`.  Every read and
//! write path of the façade goes through one `encode_*` / `decode_*` pair, so
//! callers never observe the internal encoding and the engines stay free of
//! domain conversions.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use hearth_shared::types::{
    ChatRecord, DocumentRecord, EntityKind, MessageRecord, QueuedFileUpload, StoredFile,
    Tombstone,
};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRow {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub visibility: String,
    pub created_at: i64,
    pub synced_at: Option<i64>,
    pub is_dirty: i64,
    /// Assigned by the engine: bumped on every save, ignored on write.
    pub local_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
    pub synced_at: Option<i64>,
    pub is_dirty: i64,
    pub local_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub content: String,
    pub user_id: String,
    pub created_at: i64,
    pub synced_at: Option<i64>,
    pub is_dirty: i64,
    pub local_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub id: String,
    pub bytes: Vec<u8>,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRow {
    pub id: String,
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: i64,
    pub status: String,
    pub remote_url: Option<String>,
    pub last_error: Option<String>,
    pub attempts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneRow {
    pub kind: String,
    pub id: String,
    pub deleted_at: i64,
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

pub fn encode_time(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn decode_time(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub fn encode_flag(flag: bool) -> i64 {
    i64::from(flag)
}

pub fn decode_flag(value: i64) -> bool {
    value != 0
}

fn time_field(table: &'static str, id: &str, ms: i64) -> Result<DateTime<Utc>> {
    decode_time(ms).ok_or_else(|| StoreError::Decode {
        table,
        id: id.to_string(),
        reason: format!("timestamp out of range: {ms}"),
    })
}

fn uuid_field(table: &'static str, id: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Decode {
        table,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn enum_field<T>(table: &'static str, id: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| StoreError::Decode {
        table,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn size_field(table: &'static str, id: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Decode {
        table,
        id: id.to_string(),
        reason: format!("negative size: {value}"),
    })
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

pub fn encode_chat(c: &ChatRecord) -> ChatRow {
    ChatRow {
        id: c.id.to_string(),
        title: c.title.clone(),
        user_id: c.user_id.clone(),
        visibility: c.visibility.as_str().to_string(),
        created_at: encode_time(c.created_at),
        synced_at: c.synced_at.map(encode_time),
        is_dirty: encode_flag(c.is_dirty),
        local_version: 0,
    }
}

pub fn decode_chat(row: ChatRow) -> Result<ChatRecord> {
    const T: &str = "chats";
    let synced_at = row
        .synced_at
        .map(|ms| time_field(T, &row.id, ms))
        .transpose()?;
    Ok(ChatRecord {
        id: uuid_field(T, &row.id, &row.id)?,
        visibility: enum_field(T, &row.id, &row.visibility)?,
        created_at: time_field(T, &row.id, row.created_at)?,
        synced_at,
        is_dirty: decode_flag(row.is_dirty),
        title: row.title,
        user_id: row.user_id,
    })
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub fn encode_message(m: &MessageRecord) -> MessageRow {
    MessageRow {
        id: m.id.to_string(),
        chat_id: m.chat_id.to_string(),
        role: m.role.as_str().to_string(),
        content: m.content.clone(),
        created_at: encode_time(m.created_at),
        synced_at: m.synced_at.map(encode_time),
        is_dirty: encode_flag(m.is_dirty),
        local_version: 0,
    }
}

pub fn decode_message(row: MessageRow) -> Result<MessageRecord> {
    const T: &str = "messages";
    let synced_at = row
        .synced_at
        .map(|ms| time_field(T, &row.id, ms))
        .transpose()?;
    Ok(MessageRecord {
        id: uuid_field(T, &row.id, &row.id)?,
        chat_id: uuid_field(T, &row.id, &row.chat_id)?,
        role: enum_field(T, &row.id, &row.role)?,
        created_at: time_field(T, &row.id, row.created_at)?,
        synced_at,
        is_dirty: decode_flag(row.is_dirty),
        content: row.content,
    })
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

pub fn encode_document(d: &DocumentRecord) -> DocumentRow {
    DocumentRow {
        id: d.id.to_string(),
        title: d.title.clone(),
        kind: d.kind.as_str().to_string(),
        content: d.content.clone(),
        user_id: d.user_id.clone(),
        created_at: encode_time(d.created_at),
        synced_at: d.synced_at.map(encode_time),
        is_dirty: encode_flag(d.is_dirty),
        local_version: 0,
    }
}

pub fn decode_document(row: DocumentRow) -> Result<DocumentRecord> {
    const T: &str = "documents";
    let synced_at = row
        .synced_at
        .map(|ms| time_field(T, &row.id, ms))
        .transpose()?;
    Ok(DocumentRecord {
        id: uuid_field(T, &row.id, &row.id)?,
        kind: enum_field(T, &row.id, &row.kind)?,
        created_at: time_field(T, &row.id, row.created_at)?,
        synced_at,
        is_dirty: decode_flag(row.is_dirty),
        title: row.title,
        content: row.content,
        user_id: row.user_id,
    })
}

// ---------------------------------------------------------------------------
// Files and uploads
// ---------------------------------------------------------------------------

pub fn encode_file(f: &StoredFile) -> FileRow {
    FileRow {
        id: f.id.to_string(),
        bytes: f.bytes.clone(),
        name: f.name.clone(),
        mime_type: f.mime_type.clone(),
        size: i64::try_from(f.size).unwrap_or(i64::MAX),
        created_at: encode_time(f.created_at),
    }
}

pub fn decode_file(row: FileRow) -> Result<StoredFile> {
    const T: &str = "files";
    Ok(StoredFile {
        id: uuid_field(T, &row.id, &row.id)?,
        size: size_field(T, &row.id, row.size)?,
        created_at: time_field(T, &row.id, row.created_at)?,
        bytes: row.bytes,
        name: row.name,
        mime_type: row.mime_type,
    })
}

pub fn encode_upload(u: &QueuedFileUpload) -> UploadRow {
    UploadRow {
        id: u.id.to_string(),
        file_id: u.file_id.to_string(),
        name: u.name.clone(),
        mime_type: u.mime_type.clone(),
        size: i64::try_from(u.size).unwrap_or(i64::MAX),
        created_at: encode_time(u.created_at),
        status: u.status.as_str().to_string(),
        remote_url: u.remote_url.clone(),
        last_error: u.last_error.clone(),
        attempts: i64::from(u.attempts),
    }
}

pub fn decode_upload(row: UploadRow) -> Result<QueuedFileUpload> {
    const T: &str = "uploads";
    Ok(QueuedFileUpload {
        id: uuid_field(T, &row.id, &row.id)?,
        file_id: uuid_field(T, &row.id, &row.file_id)?,
        size: size_field(T, &row.id, row.size)?,
        created_at: time_field(T, &row.id, row.created_at)?,
        status: enum_field(T, &row.id, &row.status)?,
        attempts: u32::try_from(row.attempts).unwrap_or(0),
        name: row.name,
        mime_type: row.mime_type,
        remote_url: row.remote_url,
        last_error: row.last_error,
    })
}

// ---------------------------------------------------------------------------
// Tombstones
// ---------------------------------------------------------------------------

pub fn encode_tombstone(t: &Tombstone) -> TombstoneRow {
    TombstoneRow {
        kind: t.kind.as_str().to_string(),
        id: t.id.to_string(),
        deleted_at: encode_time(t.deleted_at),
    }
}

pub fn decode_tombstone(row: TombstoneRow) -> Result<Tombstone> {
    const T: &str = "tombstones";
    Ok(Tombstone {
        kind: enum_field::<EntityKind>(T, &row.id, &row.kind)?,
        id: uuid_field(T, &row.id, &row.id)?,
        deleted_at: time_field(T, &row.id, row.deleted_at)?,
    })
}
