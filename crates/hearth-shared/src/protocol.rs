//! JSON bodies exchanged between the client sync engine and the server of
//! record, plus the archival result types returned by the admin routes.
//!
//! Wire records carry no sync bookkeeping (`synced_at`, `is_dirty`): those are
//! local concerns and are rebuilt by the client when a pulled record is merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatRecord, DocumentKind, DocumentRecord, MessageRecord, Role, Visibility};

// ---------------------------------------------------------------------------
// Sync records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteChat {
    pub id: Uuid,
    pub title: String,
    pub user_id: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteDocument {
    pub id: Uuid,
    pub title: String,
    pub kind: DocumentKind,
    pub content: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatRecord> for RemoteChat {
    fn from(c: &ChatRecord) -> Self {
        Self {
            id: c.id,
            title: c.title.clone(),
            user_id: c.user_id.clone(),
            visibility: c.visibility,
            created_at: c.created_at,
        }
    }
}

impl From<&MessageRecord> for RemoteMessage {
    fn from(m: &MessageRecord) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            role: m.role,
            content: m.content.clone(),
            created_at: m.created_at,
        }
    }
}

impl From<&DocumentRecord> for RemoteDocument {
    fn from(d: &DocumentRecord) -> Self {
        Self {
            id: d.id,
            title: d.title.clone(),
            kind: d.kind,
            content: d.content.clone(),
            user_id: d.user_id.clone(),
            created_at: d.created_at,
        }
    }
}

impl RemoteChat {
    /// Build the clean local copy of a pulled chat.
    pub fn into_record(self, synced_at: DateTime<Utc>) -> ChatRecord {
        ChatRecord {
            id: self.id,
            title: self.title,
            user_id: self.user_id,
            visibility: self.visibility,
            created_at: self.created_at,
            synced_at: Some(synced_at),
            is_dirty: false,
        }
    }
}

impl RemoteMessage {
    pub fn into_record(self, synced_at: DateTime<Utc>) -> MessageRecord {
        MessageRecord {
            id: self.id,
            chat_id: self.chat_id,
            role: self.role,
            content: self.content,
            created_at: self.created_at,
            synced_at: Some(synced_at),
            is_dirty: false,
        }
    }
}

impl RemoteDocument {
    pub fn into_record(self, synced_at: DateTime<Utc>) -> DocumentRecord {
        DocumentRecord {
            id: self.id,
            title: self.title,
            kind: self.kind,
            content: self.content,
            user_id: self.user_id,
            created_at: self.created_at,
            synced_at: Some(synced_at),
            is_dirty: false,
        }
    }
}

/// Response of `PUT /api/sync/{kind}/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushAck {
    pub id: Uuid,
    /// `false` when the server already held an identical record.
    pub applied: bool,
}

/// Query of `GET /api/sync/changes`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PullQuery {
    /// Epoch milliseconds; records updated strictly after this are returned.
    pub since: i64,
}

/// Response of `GET /api/sync/changes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullResponse {
    pub chats: Vec<RemoteChat>,
    pub messages: Vec<RemoteMessage>,
    #[serde(default)]
    pub documents: Vec<RemoteDocument>,
    /// Server clock at the time of the query, used as the next checkpoint.
    pub server_time: i64,
}

impl PullResponse {
    pub fn len(&self) -> usize {
        self.chats.len() + self.messages.len() + self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

/// Response of `POST /api/files/upload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub url: String,
    pub stored_name: String,
    pub content_type: String,
}

// ---------------------------------------------------------------------------
// Active sessions and archival
// ---------------------------------------------------------------------------

/// A message as held in the fast active-session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of archiving one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    pub messages_synced: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn ok(messages_synced: u64) -> Self {
        Self {
            success: true,
            messages_synced,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            messages_synced: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedSession {
    /// The session id as discovered, which may not be a valid UUID.
    pub session_id: String,
    pub error: String,
}

/// Outcome of one session within a full pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSyncResult {
    pub session_id: String,
    #[serde(flatten)]
    pub result: SyncResult,
}

/// Summary of a full archival pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalSyncResult {
    pub sessions_processed: u64,
    pub total_messages_synced: u64,
    pub failed_sessions: Vec<FailedSession>,
    pub failed_sessions_count: u64,
    /// One entry per processed session, in discovery order.
    #[serde(default)]
    pub sessions: Vec<SessionSyncResult>,
}

impl GlobalSyncResult {
    /// Add the outcome of one processed session.
    pub fn record(&mut self, session_id: impl Into<String>, result: SyncResult) {
        let session_id = session_id.into();
        self.sessions_processed += 1;
        if result.success {
            self.total_messages_synced += result.messages_synced;
        } else {
            let error = result.error.clone().unwrap_or_default();
            self.record_failure(session_id.clone(), error);
        }
        self.sessions.push(SessionSyncResult { session_id, result });
    }

    /// Note a failure that is not tied to a processed session's outcome,
    /// such as a failed scan.
    pub fn record_failure(&mut self, session_id: impl Into<String>, error: impl Into<String>) {
        self.failed_sessions.push(FailedSession {
            session_id: session_id.into(),
            error: error.into(),
        });
        self.failed_sessions_count = self.failed_sessions.len() as u64;
    }
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulled_record_is_clean() {
        let remote = RemoteMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: Role::Assistant,
            content: "hello".into(),
            created_at: Utc::now(),
        };
        let now = Utc::now();
        let record = remote.clone().into_record(now);
        assert!(!record.is_dirty);
        assert_eq!(record.synced_at, Some(now));
        assert_eq!(RemoteMessage::from(&record), remote);
    }

    #[test]
    fn pull_response_tolerates_missing_documents() {
        let json = r#"{"chats":[],"messages":[],"server_time":42}"#;
        let resp: PullResponse = serde_json::from_str(json).unwrap();
        assert!(resp.is_empty());
        assert_eq!(resp.server_time, 42);
    }

    #[test]
    fn global_result_keeps_every_session_outcome() {
        let mut summary = GlobalSyncResult::default();
        summary.record("a", SyncResult::ok(2));
        summary.record("not-a-uuid", SyncResult::failed("invalid session id"));
        assert_eq!(summary.sessions_processed, 2);
        assert_eq!(summary.total_messages_synced, 2);
        assert_eq!(summary.failed_sessions_count, 1);
        assert_eq!(summary.failed_sessions[0].session_id, "not-a-uuid");
        assert!(summary.sessions[0].result.success);
        assert!(!summary.sessions[1].result.success);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["sessions"][0]["session_id"], "a");
        assert_eq!(json["sessions"][0]["messages_synced"], 2);
    }
}
