//! The storage façade.
//!
//! [`Storage`] is the only handle the rest of the client gets on local data.
//! It routes every call to the durable SQLite engine, or to the in-memory
//! fallback once the durable engine has failed, and applies the
//! [`codec`](crate::codec) mapping on the way in and out.
//!
//! Read paths never return errors: a failing read is logged and produces
//! `None` or an empty list.  Write paths return [`Result`] so callers can tell
//! the user a save did not land.
//!
//! Fallback engagement is one-way for the life of the instance.  A durable
//! failure on any call flips it and the same call is retried on the fallback.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use hearth_shared::types::{
    ChatRecord, DocumentRecord, EntityKind, MessageRecord, QueuedFileUpload, StoredFile,
    Tombstone,
};

use crate::codec::{self, TombstoneRow};
use crate::database::Database;
use crate::error::Result;
use crate::local_store::LocalStore;
use crate::memory_store::MemoryStore;

/// `kv` key holding the pull high-water mark (epoch millis).
const PULL_CHECKPOINT_KEY: &str = "sync.pull_checkpoint";

/// A dirty-trackable record of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRecord {
    Chat(ChatRecord),
    Message(MessageRecord),
    Document(DocumentRecord),
}

impl SyncRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Chat(_) => EntityKind::Chat,
            Self::Message(_) => EntityKind::Message,
            Self::Document(_) => EntityKind::Document,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Chat(c) => c.id,
            Self::Message(m) => m.id,
            Self::Document(d) => d.id,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Chat(c) => c.is_dirty,
            Self::Message(m) => m.is_dirty,
            Self::Document(d) => d.is_dirty,
        }
    }
}

/// A dirty record and the local version it was read at.  The version goes
/// back into [`Storage::mark_synced`] once the push is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub record: SyncRecord,
    pub version: i64,
}

/// What happened to a pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The server copy replaced (or created) the local one.
    Applied,
    /// The local copy is dirty and was kept.
    KeptLocal,
    /// The record was deleted locally and the deletion is not pushed yet.
    Tombstoned,
}

pub struct Storage {
    durable: Option<Box<dyn LocalStore>>,
    fallback: Box<dyn LocalStore>,
    fallback_engaged: AtomicBool,
}

impl Storage {
    /// Build a façade over `durable`, with a fresh in-memory fallback.
    pub fn new(durable: Box<dyn LocalStore>) -> Self {
        Self::with_engines(Some(durable), Box::new(MemoryStore::new()))
    }

    /// Build a façade from explicit engines.  `None` as the durable engine
    /// starts the façade in fallback mode.
    pub fn with_engines(
        durable: Option<Box<dyn LocalStore>>,
        fallback: Box<dyn LocalStore>,
    ) -> Self {
        let engaged = durable.is_none();
        if engaged {
            warn!("durable store unavailable, using in-memory fallback for this session");
        }
        Self {
            durable,
            fallback,
            fallback_engaged: AtomicBool::new(engaged),
        }
    }

    /// Open the SQLite database at `path`.  Never fails: if the database
    /// cannot be opened the façade starts on the in-memory fallback.
    pub fn open(path: &Path) -> Self {
        Self::from_open_result(Database::open_at(path))
    }

    /// Open the database in the platform data directory.
    pub fn open_default() -> Self {
        Self::from_open_result(Database::new())
    }

    /// A façade over a private in-memory SQLite database.
    pub fn in_memory() -> Self {
        Self::from_open_result(Database::open_in_memory())
    }

    fn from_open_result(result: Result<Database>) -> Self {
        match result {
            Ok(db) => Self::new(Box::new(db)),
            Err(e) => {
                error!(error = %e, "failed to open local database");
                Self::with_engines(None, Box::new(MemoryStore::new()))
            }
        }
    }

    /// Whether calls are being served by the in-memory fallback.
    pub fn is_using_fallback(&self) -> bool {
        self.fallback_engaged.load(Ordering::Acquire)
    }

    /// Name of the engine currently serving calls.
    pub fn backend(&self) -> &'static str {
        if self.is_using_fallback() {
            self.fallback.backend()
        } else {
            self.durable
                .as_deref()
                .map_or(self.fallback.backend(), |d| d.backend())
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    fn run<T>(&self, op: &'static str, f: impl Fn(&dyn LocalStore) -> Result<T>) -> Result<T> {
        if !self.is_using_fallback() {
            if let Some(durable) = self.durable.as_deref() {
                match f(durable) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(op, error = %e, "durable store failed, engaging in-memory fallback");
                        self.fallback_engaged.store(true, Ordering::Release);
                    }
                }
            }
        }
        f(self.fallback.as_ref())
    }

    /// Like [`run`](Self::run) but swallows the error for read paths.
    fn read<T: Default>(&self, op: &'static str, f: impl Fn(&dyn LocalStore) -> Result<T>) -> T {
        self.run(op, f).unwrap_or_else(|e| {
            error!(op, error = %e, "read failed on fallback store");
            T::default()
        })
    }

    fn tombstone(&self, kind: EntityKind, id: &str) -> Result<()> {
        let row = TombstoneRow {
            kind: kind.as_str().to_string(),
            id: id.to_string(),
            deleted_at: codec::encode_time(Utc::now()),
        };
        self.run("put_tombstone", |s| s.put_tombstone(&row))
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Save a chat and mark it dirty.  A nil id is replaced by a fresh one.
    pub fn save_chat(&self, mut chat: ChatRecord) -> Result<Uuid> {
        if chat.id.is_nil() {
            chat.id = Uuid::new_v4();
        }
        chat.is_dirty = true;
        let row = codec::encode_chat(&chat);
        self.run("save_chat", |s| s.put_chat(&row))?;
        debug!(chat_id = %chat.id, "chat saved");
        Ok(chat.id)
    }

    pub fn get_chat(&self, id: Uuid) -> Option<ChatRecord> {
        let key = id.to_string();
        let row = self.read("get_chat", |s| s.get_chat(&key))?;
        decode_or_log(codec::decode_chat(row))
    }

    /// Chats owned by `user_id`, newest first.
    pub fn get_chats(&self, user_id: &str) -> Vec<ChatRecord> {
        self.read("get_chats", |s| s.list_chats(user_id))
            .into_iter()
            .filter_map(|row| decode_or_log(codec::decode_chat(row)))
            .collect()
    }

    /// Delete a chat and every message that belongs to it.  Returns the number
    /// of messages removed.
    ///
    /// Not atomic across the two tables: a crash in between leaves orphaned
    /// messages, which no read path exposes because messages are only listed
    /// per chat.
    pub fn delete_chat_and_messages(&self, chat_id: Uuid) -> Result<usize> {
        let key = chat_id.to_string();
        let chat = self.run("get_chat", |s| s.get_chat(&key))?;

        let removed = self.run("delete_messages", |s| s.delete_messages(&key, None))?;
        self.run("delete_chat", |s| s.delete_chat(&key))?;

        match chat {
            Some(chat) if chat.synced_at.is_some() => {
                // The server cascades to messages on its side.
                self.tombstone(EntityKind::Chat, &key)?;
            }
            _ => {
                for m in removed.iter().filter(|m| m.synced_at.is_some()) {
                    self.tombstone(EntityKind::Message, &m.id)?;
                }
            }
        }

        debug!(chat_id = %chat_id, messages = removed.len(), "chat deleted");
        Ok(removed.len())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn save_message(&self, mut message: MessageRecord) -> Result<Uuid> {
        if message.id.is_nil() {
            message.id = Uuid::new_v4();
        }
        message.is_dirty = true;
        let row = codec::encode_message(&message);
        self.run("save_message", |s| s.put_message(&row))?;
        Ok(message.id)
    }

    pub fn get_message(&self, id: Uuid) -> Option<MessageRecord> {
        let key = id.to_string();
        let row = self.read("get_message", |s| s.get_message(&key))?;
        decode_or_log(codec::decode_message(row))
    }

    /// Messages of a chat in conversation order.
    pub fn get_messages(&self, chat_id: Uuid) -> Vec<MessageRecord> {
        let key = chat_id.to_string();
        self.read("get_messages", |s| s.list_messages(&key))
            .into_iter()
            .filter_map(|row| decode_or_log(codec::decode_message(row)))
            .collect()
    }

    /// Delete `message_id` and every later message of the same chat (used when
    /// the user edits an earlier message).  Returns the number removed; an
    /// unknown id removes nothing.
    pub fn delete_trailing_messages(&self, message_id: Uuid) -> Result<usize> {
        let key = message_id.to_string();
        let Some(anchor) = self.run("get_message", |s| s.get_message(&key))? else {
            return Ok(0);
        };

        let removed = self.run("delete_messages", |s| {
            s.delete_messages(&anchor.chat_id, Some(anchor.created_at))
        })?;
        for m in removed.iter().filter(|m| m.synced_at.is_some()) {
            self.tombstone(EntityKind::Message, &m.id)?;
        }

        debug!(
            message_id = %message_id,
            chat_id = %anchor.chat_id,
            removed = removed.len(),
            "trailing messages deleted"
        );
        Ok(removed.len())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn save_document(&self, mut document: DocumentRecord) -> Result<Uuid> {
        if document.id.is_nil() {
            document.id = Uuid::new_v4();
        }
        document.is_dirty = true;
        let row = codec::encode_document(&document);
        self.run("save_document", |s| s.put_document(&row))?;
        Ok(document.id)
    }

    pub fn get_document(&self, id: Uuid) -> Option<DocumentRecord> {
        let key = id.to_string();
        let row = self.read("get_document", |s| s.get_document(&key))?;
        decode_or_log(codec::decode_document(row))
    }

    /// Documents owned by `user_id`, newest first.
    pub fn get_documents(&self, user_id: &str) -> Vec<DocumentRecord> {
        self.read("get_documents", |s| s.list_documents(user_id))
            .into_iter()
            .filter_map(|row| decode_or_log(codec::decode_document(row)))
            .collect()
    }

    pub fn delete_document(&self, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        let existing = self.run("get_document", |s| s.get_document(&key))?;
        let deleted = self.run("delete_document", |s| s.delete_document(&key))?;
        if existing.is_some_and(|d| d.synced_at.is_some()) {
            self.tombstone(EntityKind::Document, &key)?;
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Record a server acknowledgment of the copy read at `version`:
    /// `synced_at = now`, `is_dirty = false`.  Returns `false` when the
    /// record is gone or was saved again after the push read it, in which
    /// case it stays dirty for the next cycle.
    pub fn mark_synced(&self, kind: EntityKind, id: Uuid, version: i64) -> Result<bool> {
        let key = id.to_string();
        let now = codec::encode_time(Utc::now());
        self.run("mark_synced", |s| s.mark_synced(kind, &key, now, version))
    }

    /// Every dirty record of `kind`, oldest first.
    pub fn list_dirty(&self, kind: EntityKind) -> Vec<PendingChange> {
        match kind {
            EntityKind::Chat => self
                .read("list_dirty_chats", |s| s.list_dirty_chats())
                .into_iter()
                .filter_map(|row| {
                    let version = row.local_version;
                    decode_or_log(codec::decode_chat(row)).map(|c| PendingChange {
                        record: SyncRecord::Chat(c),
                        version,
                    })
                })
                .collect(),
            EntityKind::Message => self
                .read("list_dirty_messages", |s| s.list_dirty_messages())
                .into_iter()
                .filter_map(|row| {
                    let version = row.local_version;
                    decode_or_log(codec::decode_message(row)).map(|m| PendingChange {
                        record: SyncRecord::Message(m),
                        version,
                    })
                })
                .collect(),
            EntityKind::Document => self
                .read("list_dirty_documents", |s| s.list_dirty_documents())
                .into_iter()
                .filter_map(|row| {
                    let version = row.local_version;
                    decode_or_log(codec::decode_document(row)).map(|d| PendingChange {
                        record: SyncRecord::Document(d),
                        version,
                    })
                })
                .collect(),
        }
    }

    pub fn dirty_count(&self) -> u64 {
        self.read("count_dirty", |s| s.count_dirty())
    }

    /// True iff at least one chat, message or document is dirty.
    pub fn has_unsynced_changes(&self) -> bool {
        self.dirty_count() > 0
    }

    /// Merge a record received from the server: a dirty local copy wins, a
    /// tombstoned id is not resurrected, anything else is overwritten with a
    /// clean copy stamped `synced_at = now`.
    pub fn merge_pulled(&self, record: SyncRecord) -> Result<MergeOutcome> {
        let kind = record.kind();
        let key = record.id().to_string();
        if self.run("has_tombstone", |s| s.has_tombstone(kind.as_str(), &key))? {
            return Ok(MergeOutcome::Tombstoned);
        }

        let now = Utc::now();
        let applied = match record {
            SyncRecord::Chat(mut chat) => {
                chat.is_dirty = false;
                chat.synced_at = Some(now);
                let row = codec::encode_chat(&chat);
                self.run("merge_chat", |s| s.merge_chat(&row))?
            }
            SyncRecord::Message(mut message) => {
                message.is_dirty = false;
                message.synced_at = Some(now);
                let row = codec::encode_message(&message);
                self.run("merge_message", |s| s.merge_message(&row))?
            }
            SyncRecord::Document(mut document) => {
                document.is_dirty = false;
                document.synced_at = Some(now);
                let row = codec::encode_document(&document);
                self.run("merge_document", |s| s.merge_document(&row))?
            }
        };

        Ok(if applied {
            MergeOutcome::Applied
        } else {
            MergeOutcome::KeptLocal
        })
    }

    // ------------------------------------------------------------------
    // Tombstones and checkpoint
    // ------------------------------------------------------------------

    /// Local deletions not yet acknowledged by the server, oldest first.
    pub fn tombstones(&self) -> Vec<Tombstone> {
        self.read("list_tombstones", |s| s.list_tombstones())
            .into_iter()
            .filter_map(|row| decode_or_log(codec::decode_tombstone(row)))
            .collect()
    }

    pub fn clear_tombstone(&self, kind: EntityKind, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        self.run("delete_tombstone", |s| s.delete_tombstone(kind.as_str(), &key))
    }

    /// Pull high-water mark in epoch millis; `0` before the first pull.
    pub fn pull_checkpoint(&self) -> i64 {
        self.read("kv_get", |s| s.kv_get(PULL_CHECKPOINT_KEY))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_pull_checkpoint(&self, millis: i64) -> Result<()> {
        let value = millis.to_string();
        self.run("kv_set", |s| s.kv_set(PULL_CHECKPOINT_KEY, &value))
    }

    // ------------------------------------------------------------------
    // Files and uploads
    // ------------------------------------------------------------------

    pub fn save_file(&self, file: &StoredFile) -> Result<()> {
        let row = codec::encode_file(file);
        self.run("save_file", |s| s.put_file(&row))
    }

    pub fn get_file(&self, id: Uuid) -> Option<StoredFile> {
        let key = id.to_string();
        let row = self.read("get_file", |s| s.get_file(&key))?;
        decode_or_log(codec::decode_file(row))
    }

    pub fn delete_file(&self, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        self.run("delete_file", |s| s.delete_file(&key))
    }

    pub fn save_upload(&self, upload: &QueuedFileUpload) -> Result<()> {
        let row = codec::encode_upload(upload);
        self.run("save_upload", |s| s.put_upload(&row))
    }

    pub fn get_upload(&self, id: Uuid) -> Option<QueuedFileUpload> {
        let key = id.to_string();
        let row = self.read("get_upload", |s| s.get_upload(&key))?;
        decode_or_log(codec::decode_upload(row))
    }

    /// All queued uploads, oldest first.
    pub fn get_uploads(&self) -> Vec<QueuedFileUpload> {
        self.read("list_uploads", |s| s.list_uploads())
            .into_iter()
            .filter_map(|row| decode_or_log(codec::decode_upload(row)))
            .collect()
    }

    pub fn delete_upload(&self, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        self.run("delete_upload", |s| s.delete_upload(&key))
    }
}

fn decode_or_log<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "skipping undecodable row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use hearth_shared::types::{DocumentKind, Role, UploadStatus};

    use crate::codec::{ChatRow, DocumentRow, FileRow, MessageRow, UploadRow};
    use crate::error::StoreError;

    /// Storage keeps millisecond precision.
    fn now_ms() -> DateTime<Utc> {
        codec::decode_time(Utc::now().timestamp_millis()).unwrap()
    }

    fn chat(title: &str) -> ChatRecord {
        let mut c = ChatRecord::new(title, "user-1");
        c.created_at = now_ms();
        c
    }

    fn message(chat_id: Uuid, content: &str, created_at: DateTime<Utc>) -> MessageRecord {
        let mut m = MessageRecord::new(chat_id, Role::User, content);
        m.created_at = created_at;
        m
    }

    /// Acknowledge the current dirty copy of `id`, as a push would.
    fn acknowledge(storage: &Storage, kind: EntityKind, id: Uuid) -> bool {
        let version = storage
            .list_dirty(kind)
            .into_iter()
            .find(|p| p.record.id() == id)
            .map(|p| p.version)
            .unwrap();
        storage.mark_synced(kind, id, version).unwrap()
    }

    #[test]
    fn save_then_get_returns_dirty_copy() {
        let storage = Storage::in_memory();
        let mut c = chat("Test");
        c.is_dirty = false;
        let id = storage.save_chat(c.clone()).unwrap();

        let loaded = storage.get_chat(id).unwrap();
        assert!(loaded.is_dirty);
        assert_eq!(loaded.title, c.title);
        assert_eq!(loaded.created_at, c.created_at);
        assert_eq!(loaded.synced_at, None);
    }

    #[test]
    fn nil_id_gets_generated() {
        let storage = Storage::in_memory();
        let mut c = chat("untitled");
        c.id = Uuid::nil();
        let id = storage.save_chat(c).unwrap();
        assert!(!id.is_nil());
        assert!(storage.get_chat(id).is_some());
    }

    #[test]
    fn mark_synced_clears_flag_and_stamps_time() {
        let storage = Storage::in_memory();
        let c = chat("Test");
        let saved_at = c.created_at;
        let id = storage.save_chat(c).unwrap();

        assert!(acknowledge(&storage, EntityKind::Chat, id));
        let loaded = storage.get_chat(id).unwrap();
        assert!(!loaded.is_dirty);
        assert!(loaded.synced_at.unwrap() >= saved_at);
    }

    #[test]
    fn save_after_list_dirty_survives_the_ack_and_the_pull() {
        let storage = Storage::in_memory();
        let mut c = chat("v1");
        let id = storage.save_chat(c.clone()).unwrap();
        let pushed = storage.list_dirty(EntityKind::Chat).remove(0);
        assert_eq!(pushed.record, SyncRecord::Chat(storage.get_chat(id).unwrap()));

        c.title = "v2".into();
        storage.save_chat(c).unwrap();

        assert!(!storage
            .mark_synced(EntityKind::Chat, id, pushed.version)
            .unwrap());
        assert!(storage.get_chat(id).unwrap().is_dirty);

        let outcome = storage.merge_pulled(pushed.record).unwrap();
        assert_eq!(outcome, MergeOutcome::KeptLocal);
        assert_eq!(storage.get_chat(id).unwrap().title, "v2");
        assert_eq!(storage.list_dirty(EntityKind::Chat).len(), 1);
    }

    #[test]
    fn unsynced_changes_tracks_every_kind() {
        let storage = Storage::in_memory();
        assert!(!storage.has_unsynced_changes());

        let chat_id = storage.save_chat(chat("one")).unwrap();
        assert!(storage.has_unsynced_changes());

        let m1 = storage.save_message(message(chat_id, "a", now_ms())).unwrap();
        let m2 = storage.save_message(message(chat_id, "b", now_ms())).unwrap();
        let doc = storage
            .save_document(DocumentRecord::new("d", DocumentKind::Text, "x", "user-1"))
            .unwrap();
        assert_eq!(storage.dirty_count(), 4);

        acknowledge(&storage, EntityKind::Chat, chat_id);
        acknowledge(&storage, EntityKind::Message, m1);
        acknowledge(&storage, EntityKind::Message, m2);
        assert!(storage.has_unsynced_changes());

        acknowledge(&storage, EntityKind::Document, doc);
        assert!(!storage.has_unsynced_changes());
    }

    #[test]
    fn cascade_delete_removes_chat_and_messages() {
        let storage = Storage::in_memory();
        let chat_id = storage.save_chat(chat("Doomed")).unwrap();
        for i in 0..5 {
            storage
                .save_message(message(chat_id, &format!("m{i}"), now_ms()))
                .unwrap();
        }
        let other = storage.save_chat(chat("Other")).unwrap();
        storage.save_message(message(other, "keep", now_ms())).unwrap();

        assert_eq!(storage.delete_chat_and_messages(chat_id).unwrap(), 5);
        assert!(storage.get_chat(chat_id).is_none());
        assert!(storage.get_messages(chat_id).is_empty());
        assert_eq!(storage.get_messages(other).len(), 1);
        // Never synced, so there is nothing to tell the server.
        assert!(storage.tombstones().is_empty());
    }

    #[test]
    fn deleting_a_synced_chat_leaves_a_tombstone() {
        let storage = Storage::in_memory();
        let chat_id = storage.save_chat(chat("Synced")).unwrap();
        acknowledge(&storage, EntityKind::Chat, chat_id);

        storage.delete_chat_and_messages(chat_id).unwrap();
        let tombstones = storage.tombstones();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].kind, EntityKind::Chat);
        assert_eq!(tombstones[0].id, chat_id);

        assert!(storage.clear_tombstone(EntityKind::Chat, chat_id).unwrap());
        assert!(storage.tombstones().is_empty());
    }

    #[test]
    fn trailing_delete_keeps_earlier_messages() {
        let storage = Storage::in_memory();
        let chat_id = storage.save_chat(chat("Edit")).unwrap();
        let base = now_ms();
        let first = storage.save_message(message(chat_id, "1", base)).unwrap();
        let second = storage
            .save_message(message(chat_id, "2", base + Duration::seconds(1)))
            .unwrap();
        storage
            .save_message(message(chat_id, "3", base + Duration::seconds(2)))
            .unwrap();

        assert_eq!(storage.delete_trailing_messages(second).unwrap(), 2);
        let left = storage.get_messages(chat_id);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, first);

        assert_eq!(storage.delete_trailing_messages(Uuid::new_v4()).unwrap(), 0);
    }

    #[test]
    fn dirty_local_copy_wins_over_pull() {
        let storage = Storage::in_memory();
        let local = chat("local title");
        let id = storage.save_chat(local.clone()).unwrap();

        let mut pulled = local.clone();
        pulled.title = "server title".into();
        let outcome = storage.merge_pulled(SyncRecord::Chat(pulled)).unwrap();
        assert_eq!(outcome, MergeOutcome::KeptLocal);

        let after = storage.get_chat(id).unwrap();
        assert_eq!(after.title, "local title");
        assert!(after.is_dirty);
    }

    #[test]
    fn clean_or_missing_copy_takes_server_value() {
        let storage = Storage::in_memory();
        let local = chat("old");
        let id = storage.save_chat(local.clone()).unwrap();
        acknowledge(&storage, EntityKind::Chat, id);

        let mut pulled = local;
        pulled.title = "new".into();
        assert_eq!(
            storage.merge_pulled(SyncRecord::Chat(pulled)).unwrap(),
            MergeOutcome::Applied
        );
        let after = storage.get_chat(id).unwrap();
        assert_eq!(after.title, "new");
        assert!(!after.is_dirty);
        assert!(after.synced_at.is_some());

        let fresh = MessageRecord::new(id, Role::Assistant, "from another device");
        let fresh_id = fresh.id;
        assert_eq!(
            storage.merge_pulled(SyncRecord::Message(fresh)).unwrap(),
            MergeOutcome::Applied
        );
        assert!(!storage.get_message(fresh_id).unwrap().is_dirty);
    }

    #[test]
    fn tombstoned_records_are_not_resurrected() {
        let storage = Storage::in_memory();
        let c = chat("gone");
        let id = storage.save_chat(c.clone()).unwrap();
        acknowledge(&storage, EntityKind::Chat, id);
        storage.delete_chat_and_messages(id).unwrap();

        assert_eq!(
            storage.merge_pulled(SyncRecord::Chat(c)).unwrap(),
            MergeOutcome::Tombstoned
        );
        assert!(storage.get_chat(id).is_none());
    }

    #[test]
    fn checkpoint_defaults_to_zero() {
        let storage = Storage::in_memory();
        assert_eq!(storage.pull_checkpoint(), 0);
        storage.set_pull_checkpoint(1_700_000_000_000).unwrap();
        assert_eq!(storage.pull_checkpoint(), 1_700_000_000_000);
    }

    #[test]
    fn files_and_uploads_round_trip() {
        let storage = Storage::in_memory();
        let file = StoredFile {
            id: Uuid::new_v4(),
            bytes: b"hello".to_vec(),
            name: "hello.txt".into(),
            mime_type: "text/plain".into(),
            size: 5,
            created_at: now_ms(),
        };
        storage.save_file(&file).unwrap();
        assert_eq!(storage.get_file(file.id), Some(file.clone()));

        let upload = QueuedFileUpload {
            id: Uuid::new_v4(),
            file_id: file.id,
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size: file.size,
            created_at: now_ms(),
            status: UploadStatus::Pending,
            remote_url: None,
            last_error: None,
            attempts: 0,
        };
        storage.save_upload(&upload).unwrap();
        assert_eq!(storage.get_uploads(), vec![upload.clone()]);
        assert_eq!(storage.get_upload(upload.id), Some(upload.clone()));

        assert!(storage.delete_upload(upload.id).unwrap());
        assert!(storage.delete_file(file.id).unwrap());
        assert!(storage.get_file(file.id).is_none());
    }

    // ------------------------------------------------------------------
    // Fallback engagement
    // ------------------------------------------------------------------

    #[test]
    fn failed_open_engages_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("missing").join("hearth.db"));
        assert!(storage.is_using_fallback());
        assert_eq!(storage.backend(), "memory");

        let id = storage.save_chat(chat("offline")).unwrap();
        assert_eq!(storage.get_chat(id).unwrap().title, "offline");
        assert!(storage.is_using_fallback());
    }

    #[test]
    fn durable_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth.db");

        let id = {
            let storage = Storage::open(&path);
            assert!(!storage.is_using_fallback());
            storage.save_chat(chat("kept")).unwrap()
        };

        let storage = Storage::open(&path);
        assert_eq!(storage.get_chat(id).unwrap().title, "kept");
    }

    /// An engine whose every call fails.
    struct BrokenStore;

    fn broken<T>() -> Result<T> {
        Err(StoreError::Unavailable("disk gone".into()))
    }

    impl LocalStore for BrokenStore {
        fn backend(&self) -> &'static str {
            "broken"
        }
        fn put_chat(&self, _: &ChatRow) -> Result<()> {
            broken()
        }
        fn get_chat(&self, _: &str) -> Result<Option<ChatRow>> {
            broken()
        }
        fn list_chats(&self, _: &str) -> Result<Vec<ChatRow>> {
            broken()
        }
        fn list_dirty_chats(&self) -> Result<Vec<ChatRow>> {
            broken()
        }
        fn merge_chat(&self, _: &ChatRow) -> Result<bool> {
            broken()
        }
        fn delete_chat(&self, _: &str) -> Result<bool> {
            broken()
        }
        fn put_message(&self, _: &MessageRow) -> Result<()> {
            broken()
        }
        fn get_message(&self, _: &str) -> Result<Option<MessageRow>> {
            broken()
        }
        fn list_messages(&self, _: &str) -> Result<Vec<MessageRow>> {
            broken()
        }
        fn list_dirty_messages(&self) -> Result<Vec<MessageRow>> {
            broken()
        }
        fn merge_message(&self, _: &MessageRow) -> Result<bool> {
            broken()
        }
        fn delete_messages(&self, _: &str, _: Option<i64>) -> Result<Vec<MessageRow>> {
            broken()
        }
        fn put_document(&self, _: &DocumentRow) -> Result<()> {
            broken()
        }
        fn get_document(&self, _: &str) -> Result<Option<DocumentRow>> {
            broken()
        }
        fn list_documents(&self, _: &str) -> Result<Vec<DocumentRow>> {
            broken()
        }
        fn list_dirty_documents(&self) -> Result<Vec<DocumentRow>> {
            broken()
        }
        fn merge_document(&self, _: &DocumentRow) -> Result<bool> {
            broken()
        }
        fn delete_document(&self, _: &str) -> Result<bool> {
            broken()
        }
        fn mark_synced(&self, _: EntityKind, _: &str, _: i64, _: i64) -> Result<bool> {
            broken()
        }
        fn count_dirty(&self) -> Result<u64> {
            broken()
        }
        fn put_file(&self, _: &FileRow) -> Result<()> {
            broken()
        }
        fn get_file(&self, _: &str) -> Result<Option<FileRow>> {
            broken()
        }
        fn delete_file(&self, _: &str) -> Result<bool> {
            broken()
        }
        fn put_upload(&self, _: &UploadRow) -> Result<()> {
            broken()
        }
        fn get_upload(&self, _: &str) -> Result<Option<UploadRow>> {
            broken()
        }
        fn list_uploads(&self) -> Result<Vec<UploadRow>> {
            broken()
        }
        fn delete_upload(&self, _: &str) -> Result<bool> {
            broken()
        }
        fn put_tombstone(&self, _: &TombstoneRow) -> Result<()> {
            broken()
        }
        fn list_tombstones(&self) -> Result<Vec<TombstoneRow>> {
            broken()
        }
        fn has_tombstone(&self, _: &str, _: &str) -> Result<bool> {
            broken()
        }
        fn delete_tombstone(&self, _: &str, _: &str) -> Result<bool> {
            broken()
        }
        fn kv_get(&self, _: &str) -> Result<Option<String>> {
            broken()
        }
        fn kv_set(&self, _: &str, _: &str) -> Result<()> {
            broken()
        }
    }

    #[test]
    fn runtime_failure_engages_fallback_permanently() {
        let storage = Storage::new(Box::new(BrokenStore));
        assert!(!storage.is_using_fallback());

        // A read degrades to "absent" and flips the flag.
        assert!(storage.get_chat(Uuid::new_v4()).is_none());
        assert!(storage.is_using_fallback());

        let id = storage.save_chat(chat("rescued")).unwrap();
        assert_eq!(storage.get_chat(id).unwrap().title, "rescued");
        assert!(storage.has_unsynced_changes());
        assert!(storage.is_using_fallback());
    }

    #[test]
    fn independent_instances_do_not_share_fallback_state() {
        let broken = Storage::new(Box::new(BrokenStore));
        let healthy = Storage::in_memory();
        broken.get_chats("user-1");
        assert!(broken.is_using_fallback());
        assert!(!healthy.is_using_fallback());
    }
}
