//! In-memory [`LocalStore`] used when SQLite is unavailable.
//!
//! Same contract and ordering as the SQLite engine; nothing survives a
//! restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use hearth_shared::types::EntityKind;

use crate::codec::{ChatRow, DocumentRow, FileRow, MessageRow, TombstoneRow, UploadRow};
use crate::error::{Result, StoreError};
use crate::local_store::LocalStore;

#[derive(Default)]
struct Tables {
    chats: BTreeMap<String, ChatRow>,
    messages: BTreeMap<String, MessageRow>,
    documents: BTreeMap<String, DocumentRow>,
    files: BTreeMap<String, FileRow>,
    uploads: BTreeMap<String, UploadRow>,
    tombstones: BTreeMap<(String, String), TombstoneRow>,
    kv: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

/// Version the next save of a row gets.
fn next_version(current: Option<i64>) -> i64 {
    current.map_or(1, |v| v + 1)
}

/// Version a pulled row keeps: the local one, or 1 for a new row.
fn kept_version(current: Option<i64>) -> i64 {
    current.unwrap_or(1)
}

fn newest_first<T, F: Fn(&T) -> i64>(rows: &mut [T], key: F) {
    rows.sort_by_key(|r| std::cmp::Reverse(key(r)));
}

impl LocalStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn put_chat(&self, row: &ChatRow) -> Result<()> {
        let mut tables = self.tables()?;
        let local_version = next_version(tables.chats.get(&row.id).map(|c| c.local_version));
        tables.chats.insert(
            row.id.clone(),
            ChatRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(())
    }

    fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        Ok(self.tables()?.chats.get(id).cloned())
    }

    fn list_chats(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .chats
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |c| c.created_at);
        Ok(rows)
    }

    fn list_dirty_chats(&self) -> Result<Vec<ChatRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .chats
            .values()
            .filter(|c| c.is_dirty != 0)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows)
    }

    fn merge_chat(&self, row: &ChatRow) -> Result<bool> {
        let mut tables = self.tables()?;
        let current = tables.chats.get(&row.id);
        if current.is_some_and(|c| c.is_dirty != 0) {
            return Ok(false);
        }
        let local_version = kept_version(current.map(|c| c.local_version));
        tables.chats.insert(
            row.id.clone(),
            ChatRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(true)
    }

    fn delete_chat(&self, id: &str) -> Result<bool> {
        Ok(self.tables()?.chats.remove(id).is_some())
    }

    fn put_message(&self, row: &MessageRow) -> Result<()> {
        let mut tables = self.tables()?;
        let local_version =
            next_version(tables.messages.get(&row.id).map(|m| m.local_version));
        tables.messages.insert(
            row.id.clone(),
            MessageRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(())
    }

    fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        Ok(self.tables()?.messages.get(id).cloned())
    }

    fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        // BTreeMap iteration is already ordered by id, so a stable sort keeps
        // the (created_at, id) order of the SQLite engine.
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    fn list_dirty_messages(&self) -> Result<Vec<MessageRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .messages
            .values()
            .filter(|m| m.is_dirty != 0)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    fn merge_message(&self, row: &MessageRow) -> Result<bool> {
        let mut tables = self.tables()?;
        let current = tables.messages.get(&row.id);
        if current.is_some_and(|m| m.is_dirty != 0) {
            return Ok(false);
        }
        let local_version = kept_version(current.map(|m| m.local_version));
        tables.messages.insert(
            row.id.clone(),
            MessageRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(true)
    }

    fn delete_messages(&self, chat_id: &str, since: Option<i64>) -> Result<Vec<MessageRow>> {
        let floor = since.unwrap_or(i64::MIN);
        let mut tables = self.tables()?;
        let ids: Vec<String> = tables
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id && m.created_at >= floor)
            .map(|m| m.id.clone())
            .collect();

        let mut removed: Vec<MessageRow> = ids
            .iter()
            .filter_map(|id| tables.messages.remove(id))
            .collect();
        removed.sort_by_key(|m| m.created_at);
        Ok(removed)
    }

    fn put_document(&self, row: &DocumentRow) -> Result<()> {
        let mut tables = self.tables()?;
        let local_version =
            next_version(tables.documents.get(&row.id).map(|d| d.local_version));
        tables.documents.insert(
            row.id.clone(),
            DocumentRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        Ok(self.tables()?.documents.get(id).cloned())
    }

    fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .documents
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut rows, |d| d.created_at);
        Ok(rows)
    }

    fn list_dirty_documents(&self) -> Result<Vec<DocumentRow>> {
        let mut rows: Vec<_> = self
            .tables()?
            .documents
            .values()
            .filter(|d| d.is_dirty != 0)
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.created_at);
        Ok(rows)
    }

    fn merge_document(&self, row: &DocumentRow) -> Result<bool> {
        let mut tables = self.tables()?;
        let current = tables.documents.get(&row.id);
        if current.is_some_and(|d| d.is_dirty != 0) {
            return Ok(false);
        }
        let local_version = kept_version(current.map(|d| d.local_version));
        tables.documents.insert(
            row.id.clone(),
            DocumentRow {
                local_version,
                ..row.clone()
            },
        );
        Ok(true)
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self.tables()?.documents.remove(id).is_some())
    }

    fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        synced_at: i64,
        version: i64,
    ) -> Result<bool> {
        let mut tables = self.tables()?;
        let updated = match kind {
            EntityKind::Chat => tables
                .chats
                .get_mut(id)
                .filter(|r| r.local_version == version)
                .map(|r| {
                    r.is_dirty = 0;
                    r.synced_at = Some(synced_at);
                }),
            EntityKind::Message => tables
                .messages
                .get_mut(id)
                .filter(|r| r.local_version == version)
                .map(|r| {
                    r.is_dirty = 0;
                    r.synced_at = Some(synced_at);
                }),
            EntityKind::Document => tables
                .documents
                .get_mut(id)
                .filter(|r| r.local_version == version)
                .map(|r| {
                    r.is_dirty = 0;
                    r.synced_at = Some(synced_at);
                }),
        };
        Ok(updated.is_some())
    }

    fn count_dirty(&self) -> Result<u64> {
        let tables = self.tables()?;
        let chats = tables.chats.values().filter(|r| r.is_dirty != 0).count();
        let messages = tables.messages.values().filter(|r| r.is_dirty != 0).count();
        let documents = tables.documents.values().filter(|r| r.is_dirty != 0).count();
        Ok((chats + messages + documents) as u64)
    }

    fn put_file(&self, row: &FileRow) -> Result<()> {
        self.tables()?
            .files
            .entry(row.id.clone())
            .or_insert_with(|| row.clone());
        Ok(())
    }

    fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        Ok(self.tables()?.files.get(id).cloned())
    }

    fn delete_file(&self, id: &str) -> Result<bool> {
        Ok(self.tables()?.files.remove(id).is_some())
    }

    fn put_upload(&self, row: &UploadRow) -> Result<()> {
        self.tables()?.uploads.insert(row.id.clone(), row.clone());
        Ok(())
    }

    fn get_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        Ok(self.tables()?.uploads.get(id).cloned())
    }

    fn list_uploads(&self) -> Result<Vec<UploadRow>> {
        let mut rows: Vec<_> = self.tables()?.uploads.values().cloned().collect();
        rows.sort_by_key(|u| u.created_at);
        Ok(rows)
    }

    fn delete_upload(&self, id: &str) -> Result<bool> {
        Ok(self.tables()?.uploads.remove(id).is_some())
    }

    fn put_tombstone(&self, row: &TombstoneRow) -> Result<()> {
        self.tables()?
            .tombstones
            .insert((row.kind.clone(), row.id.clone()), row.clone());
        Ok(())
    }

    fn list_tombstones(&self) -> Result<Vec<TombstoneRow>> {
        let mut rows: Vec<_> = self.tables()?.tombstones.values().cloned().collect();
        rows.sort_by_key(|t| t.deleted_at);
        Ok(rows)
    }

    fn has_tombstone(&self, kind: &str, id: &str) -> Result<bool> {
        Ok(self
            .tables()?
            .tombstones
            .contains_key(&(kind.to_string(), id.to_string())))
    }

    fn delete_tombstone(&self, kind: &str, id: &str) -> Result<bool> {
        Ok(self
            .tables()?
            .tombstones
            .remove(&(kind.to_string(), id.to_string()))
            .is_some())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.tables()?.kv.get(key).cloned())
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.tables()?.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, chat: &str, created_at: i64) -> MessageRow {
        MessageRow {
            id: id.into(),
            chat_id: chat.into(),
            role: "assistant".into(),
            content: String::new(),
            created_at,
            synced_at: None,
            is_dirty: 1,
            local_version: 0,
        }
    }

    #[test]
    fn delete_since_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            store.put_message(&message(id, "c1", ts)).unwrap();
        }
        store.put_message(&message("z", "c2", 9)).unwrap();

        let removed = store.delete_messages("c1", Some(2)).unwrap();
        let ids: Vec<_> = removed.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(store.list_messages("c1").unwrap().len(), 1);
        assert_eq!(store.count_dirty().unwrap(), 2);
    }

    #[test]
    fn mark_synced_reports_missing_rows() {
        let store = MemoryStore::new();
        store.put_message(&message("a", "c1", 1)).unwrap();
        assert!(store.mark_synced(EntityKind::Message, "a", 10, 1).unwrap());
        assert!(!store.mark_synced(EntityKind::Chat, "a", 10, 1).unwrap());
        assert_eq!(store.count_dirty().unwrap(), 0);
    }

    #[test]
    fn resaved_row_stays_dirty_after_stale_ack() {
        let store = MemoryStore::new();
        store.put_message(&message("a", "c1", 1)).unwrap();
        let pushed = store.list_dirty_messages().unwrap()[0].local_version;
        store.put_message(&message("a", "c1", 1)).unwrap();

        assert!(!store.mark_synced(EntityKind::Message, "a", 10, pushed).unwrap());
        assert_eq!(store.count_dirty().unwrap(), 1);

        let current = store.get_message("a").unwrap().unwrap().local_version;
        assert_eq!(current, pushed + 1);
        assert!(store.mark_synced(EntityKind::Message, "a", 10, current).unwrap());
        assert_eq!(store.count_dirty().unwrap(), 0);
    }
}
