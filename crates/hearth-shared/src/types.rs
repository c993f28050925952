//! Domain records shared by the client store, the sync engine and the server.
//!
//! Timestamps are always `DateTime<Utc>` and flags are always `bool` here;
//! storage-level encodings live in `hearth-store`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HearthError;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Who can see a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(HearthError::UnknownVariant {
                field: "visibility",
                value: other.to_string(),
            }),
        }
    }
}

/// Author role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Function,
    Data,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Function => "function",
            Self::Data => "data",
            Self::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "function" => Ok(Self::Function),
            "data" => Ok(Self::Data),
            "tool" => Ok(Self::Tool),
            other => Err(HearthError::UnknownVariant {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// What a document's `content` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Code,
    Sheet,
    Image,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Sheet => "sheet",
            Self::Image => "image",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            "sheet" => Ok(Self::Sheet),
            "image" => Ok(Self::Image),
            other => Err(HearthError::UnknownVariant {
                field: "document kind",
                value: other.to_string(),
            }),
        }
    }
}

/// The three record families that take part in dirty tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Chat,
    Message,
    Document,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Chat, Self::Message, Self::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Message => "message",
            Self::Document => "document",
        }
    }

    /// Path segment used by the sync routes (`/api/sync/{segment}/{id}`).
    pub fn route_segment(&self) -> &'static str {
        match self {
            Self::Chat => "chats",
            Self::Message => "messages",
            Self::Document => "documents",
        }
    }

    pub fn from_route_segment(s: &str) -> Option<Self> {
        match s {
            "chats" => Some(Self::Chat),
            "messages" => Some(Self::Message),
            "documents" => Some(Self::Document),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "message" => Ok(Self::Message),
            "document" => Ok(Self::Document),
            other => Err(HearthError::UnknownVariant {
                field: "entity kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a queued upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(HearthError::UnknownVariant {
                field: "upload status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: Uuid,
    pub title: String,
    pub user_id: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    /// Last time the server acknowledged this record.
    pub synced_at: Option<DateTime<Utc>>,
    /// Locally mutated since the last successful push.
    pub is_dirty: bool,
}

impl ChatRecord {
    /// A fresh, never-synced private chat.
    pub fn new(title: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            user_id: user_id.into(),
            visibility: Visibility::Private,
            created_at: Utc::now(),
            synced_at: None,
            is_dirty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    /// Plain text, or serialized structured content (tool calls, parts).
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub is_dirty: bool,
}

impl MessageRecord {
    pub fn new(chat_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            synced_at: None,
            is_dirty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: Uuid,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub is_dirty: bool,
}

impl DocumentRecord {
    pub fn new(
        title: impl Into<String>,
        kind: DocumentKind,
        content: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            kind,
            content: content.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            synced_at: None,
            is_dirty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Files and uploads
// ---------------------------------------------------------------------------

/// Raw bytes of a file waiting to be uploaded. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// One entry of the offline upload queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedFileUpload {
    pub id: Uuid,
    /// The [`StoredFile`] holding the payload.
    pub file_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub status: UploadStatus,
    pub remote_url: Option<String>,
    pub last_error: Option<String>,
    /// Drain cycles that ended in `Error`.
    pub attempts: u32,
}

/// What the UI attaches to an outgoing message once a file is uploaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMetadata {
    pub url: String,
    pub name: String,
    pub content_type: String,
}

/// A local deletion that still has to be pushed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    pub kind: EntityKind,
    pub id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_strings() {
        for role in [
            Role::User,
            Role::Assistant,
            Role::System,
            Role::Function,
            Role::Data,
            Role::Tool,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!("sheet".parse::<DocumentKind>().unwrap(), DocumentKind::Sheet);
        assert_eq!("public".parse::<Visibility>().unwrap(), Visibility::Public);
        assert!("moderator".parse::<Role>().is_err());
    }

    #[test]
    fn route_segments_map_back() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_route_segment(kind.route_segment()), Some(kind));
        }
        assert_eq!(EntityKind::from_route_segment("files"), None);
    }

    #[test]
    fn records_serialize_camel_case() {
        let chat = ChatRecord::new("Test", "user-1");
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["visibility"], "private");
        assert_eq!(json["isDirty"], true);
    }
}
