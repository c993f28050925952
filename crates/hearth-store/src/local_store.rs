//! The storage engine seam.
//!
//! [`LocalStore`] is implemented by the durable SQLite [`Database`] and by the
//! in-memory [`MemoryStore`]; the façade picks one at construction time and
//! never branches on the engine type at call sites.  Engines deal in rows
//! only (see [`crate::codec`]).
//!
//! [`MemoryStore`]: crate::memory_store::MemoryStore

use hearth_shared::types::EntityKind;

use crate::codec::{ChatRow, DocumentRow, FileRow, MessageRow, TombstoneRow, UploadRow};
use crate::database::Database;
use crate::error::Result;

pub trait LocalStore: Send + Sync {
    /// Short engine name for logs.
    fn backend(&self) -> &'static str;

    // -- chats ---------------------------------------------------------------
    fn put_chat(&self, row: &ChatRow) -> Result<()>;
    fn get_chat(&self, id: &str) -> Result<Option<ChatRow>>;
    /// Chats of `user_id`, newest first.
    fn list_chats(&self, user_id: &str) -> Result<Vec<ChatRow>>;
    fn list_dirty_chats(&self) -> Result<Vec<ChatRow>>;
    /// Write a pulled chat unless the stored copy is dirty; `false` means the
    /// dirty copy was kept.  The check and the write are one atomic step.
    fn merge_chat(&self, row: &ChatRow) -> Result<bool>;
    fn delete_chat(&self, id: &str) -> Result<bool>;

    // -- messages ------------------------------------------------------------
    fn put_message(&self, row: &MessageRow) -> Result<()>;
    fn get_message(&self, id: &str) -> Result<Option<MessageRow>>;
    /// Messages of `chat_id`, oldest first.
    fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>>;
    fn list_dirty_messages(&self) -> Result<Vec<MessageRow>>;
    fn merge_message(&self, row: &MessageRow) -> Result<bool>;
    /// Delete the messages of `chat_id` created at or after `since` (all of
    /// them when `since` is `None`) and return the removed rows.
    fn delete_messages(&self, chat_id: &str, since: Option<i64>) -> Result<Vec<MessageRow>>;

    // -- documents -----------------------------------------------------------
    fn put_document(&self, row: &DocumentRow) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Option<DocumentRow>>;
    /// Documents of `user_id`, newest first.
    fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRow>>;
    fn list_dirty_documents(&self) -> Result<Vec<DocumentRow>>;
    fn merge_document(&self, row: &DocumentRow) -> Result<bool>;
    fn delete_document(&self, id: &str) -> Result<bool>;

    // -- dirty tracking ------------------------------------------------------
    /// Clear the dirty flag and stamp `synced_at`, but only while the row is
    /// still at `version`.  Returns `false` when the record does not exist or
    /// was saved again since; it then stays dirty.
    fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        synced_at: i64,
        version: i64,
    ) -> Result<bool>;
    /// Dirty chats + messages + documents.
    fn count_dirty(&self) -> Result<u64>;

    // -- files and uploads ---------------------------------------------------
    fn put_file(&self, row: &FileRow) -> Result<()>;
    fn get_file(&self, id: &str) -> Result<Option<FileRow>>;
    fn delete_file(&self, id: &str) -> Result<bool>;

    fn put_upload(&self, row: &UploadRow) -> Result<()>;
    fn get_upload(&self, id: &str) -> Result<Option<UploadRow>>;
    /// All queued uploads, oldest first.
    fn list_uploads(&self) -> Result<Vec<UploadRow>>;
    fn delete_upload(&self, id: &str) -> Result<bool>;

    // -- sync bookkeeping ----------------------------------------------------
    fn put_tombstone(&self, row: &TombstoneRow) -> Result<()>;
    fn list_tombstones(&self) -> Result<Vec<TombstoneRow>>;
    fn has_tombstone(&self, kind: &str, id: &str) -> Result<bool>;
    fn delete_tombstone(&self, kind: &str, id: &str) -> Result<bool>;

    fn kv_get(&self, key: &str) -> Result<Option<String>>;
    fn kv_set(&self, key: &str, value: &str) -> Result<()>;
}

impl LocalStore for Database {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn put_chat(&self, row: &ChatRow) -> Result<()> {
        self.upsert_chat(row)
    }
    fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.find_chat(id)
    }
    fn list_chats(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        self.list_chats_for_user(user_id)
    }
    fn list_dirty_chats(&self) -> Result<Vec<ChatRow>> {
        self.dirty_chats()
    }
    fn merge_chat(&self, row: &ChatRow) -> Result<bool> {
        self.merge_clean_chat(row)
    }
    fn delete_chat(&self, id: &str) -> Result<bool> {
        self.remove_chat(id)
    }

    fn put_message(&self, row: &MessageRow) -> Result<()> {
        self.upsert_message(row)
    }
    fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.find_message(id)
    }
    fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.list_messages_for_chat(chat_id)
    }
    fn list_dirty_messages(&self) -> Result<Vec<MessageRow>> {
        self.dirty_messages()
    }
    fn merge_message(&self, row: &MessageRow) -> Result<bool> {
        self.merge_clean_message(row)
    }
    fn delete_messages(&self, chat_id: &str, since: Option<i64>) -> Result<Vec<MessageRow>> {
        self.remove_messages(chat_id, since)
    }

    fn put_document(&self, row: &DocumentRow) -> Result<()> {
        self.upsert_document(row)
    }
    fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        self.find_document(id)
    }
    fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRow>> {
        self.list_documents_for_user(user_id)
    }
    fn list_dirty_documents(&self) -> Result<Vec<DocumentRow>> {
        self.dirty_documents()
    }
    fn merge_document(&self, row: &DocumentRow) -> Result<bool> {
        self.merge_clean_document(row)
    }
    fn delete_document(&self, id: &str) -> Result<bool> {
        self.remove_document(id)
    }

    fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        synced_at: i64,
        version: i64,
    ) -> Result<bool> {
        self.set_synced(kind, id, synced_at, version)
    }
    fn count_dirty(&self) -> Result<u64> {
        self.dirty_count()
    }

    fn put_file(&self, row: &FileRow) -> Result<()> {
        self.insert_file(row)
    }
    fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        self.find_file(id)
    }
    fn delete_file(&self, id: &str) -> Result<bool> {
        self.remove_file(id)
    }

    fn put_upload(&self, row: &UploadRow) -> Result<()> {
        self.upsert_upload(row)
    }
    fn get_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        self.find_upload(id)
    }
    fn list_uploads(&self) -> Result<Vec<UploadRow>> {
        self.all_uploads()
    }
    fn delete_upload(&self, id: &str) -> Result<bool> {
        self.remove_upload(id)
    }

    fn put_tombstone(&self, row: &TombstoneRow) -> Result<()> {
        self.insert_tombstone(row)
    }
    fn list_tombstones(&self) -> Result<Vec<TombstoneRow>> {
        self.all_tombstones()
    }
    fn has_tombstone(&self, kind: &str, id: &str) -> Result<bool> {
        self.tombstone_exists(kind, id)
    }
    fn delete_tombstone(&self, kind: &str, id: &str) -> Result<bool> {
        self.remove_tombstone(kind, id)
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>> {
        self.get_setting(key)
    }
    fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.set_setting(key, value)
    }
}
