//! Sync bookkeeping in SQLite: dirty flags, tombstones and the `kv` table.

use rusqlite::{params, OptionalExtension};

use hearth_shared::types::EntityKind;

use crate::codec::TombstoneRow;
use crate::database::Database;
use crate::error::Result;

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Chat => "chats",
        EntityKind::Message => "messages",
        EntityKind::Document => "documents",
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Dirty flags
    // ------------------------------------------------------------------

    /// Clear the dirty flag of `id` if it is still at `version`.
    pub fn set_synced(
        &self,
        kind: EntityKind,
        id: &str,
        synced_at: i64,
        version: i64,
    ) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!(
                "UPDATE {} SET is_dirty = 0, synced_at = ?2 WHERE id = ?1 AND local_version = ?3",
                table_for(kind)
            ),
            params![id, synced_at, version],
        )?;
        Ok(affected > 0)
    }

    pub fn dirty_count(&self) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT (SELECT COUNT(*) FROM chats WHERE is_dirty = 1)
                  + (SELECT COUNT(*) FROM messages WHERE is_dirty = 1)
                  + (SELECT COUNT(*) FROM documents WHERE is_dirty = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Tombstones
    // ------------------------------------------------------------------

    pub fn insert_tombstone(&self, row: &TombstoneRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO tombstones (kind, id, deleted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind, id) DO UPDATE SET deleted_at = excluded.deleted_at",
            params![row.kind, row.id, row.deleted_at],
        )?;
        Ok(())
    }

    pub fn all_tombstones(&self) -> Result<Vec<TombstoneRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT kind, id, deleted_at FROM tombstones ORDER BY deleted_at ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok(TombstoneRow {
                kind: row.get(0)?,
                id: row.get(1)?,
                deleted_at: row.get(2)?,
            })
        })?;

        let mut tombstones = Vec::new();
        for row in rows {
            tombstones.push(row?);
        }
        Ok(tombstones)
    }

    pub fn tombstone_exists(&self, kind: &str, id: &str) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM tombstones WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn remove_tombstone(&self, kind: &str, id: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            "DELETE FROM tombstones WHERE kind = ?1 AND id = ?2",
            params![kind, id],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Key/value settings
    // ------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChatRow;

    #[test]
    fn set_synced_clears_dirty_count() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_chat(&ChatRow {
            id: "c1".into(),
            title: "t".into(),
            user_id: "u".into(),
            visibility: "private".into(),
            created_at: 1,
            synced_at: None,
            is_dirty: 1,
            local_version: 0,
        })
        .unwrap();
        assert_eq!(db.dirty_count().unwrap(), 1);

        assert!(db.set_synced(EntityKind::Chat, "c1", 99, 1).unwrap());
        assert_eq!(db.dirty_count().unwrap(), 0);
        assert_eq!(db.find_chat("c1").unwrap().unwrap().synced_at, Some(99));
        assert!(!db.set_synced(EntityKind::Message, "c1", 99, 1).unwrap());
    }

    #[test]
    fn set_synced_ignores_a_stale_version() {
        let db = Database::open_in_memory().unwrap();
        let mut row = ChatRow {
            id: "c1".into(),
            title: "pushed".into(),
            user_id: "u".into(),
            visibility: "private".into(),
            created_at: 1,
            synced_at: None,
            is_dirty: 1,
            local_version: 0,
        };
        db.upsert_chat(&row).unwrap();
        let pushed = db.dirty_chats().unwrap()[0].local_version;

        row.title = "edited meanwhile".into();
        db.upsert_chat(&row).unwrap();

        assert!(!db.set_synced(EntityKind::Chat, "c1", 99, pushed).unwrap());
        let stored = db.find_chat("c1").unwrap().unwrap();
        assert_eq!(stored.is_dirty, 1);
        assert_eq!(stored.synced_at, None);
        assert_eq!(stored.title, "edited meanwhile");
    }

    #[test]
    fn tombstones_and_settings() {
        let db = Database::open_in_memory().unwrap();
        let row = TombstoneRow {
            kind: "chat".into(),
            id: "c1".into(),
            deleted_at: 5,
        };
        db.insert_tombstone(&row).unwrap();
        db.insert_tombstone(&row).unwrap();
        assert_eq!(db.all_tombstones().unwrap().len(), 1);
        assert!(db.tombstone_exists("chat", "c1").unwrap());
        assert!(!db.tombstone_exists("document", "c1").unwrap());
        assert!(db.remove_tombstone("chat", "c1").unwrap());

        assert_eq!(db.get_setting("k").unwrap(), None);
        db.set_setting("k", "1").unwrap();
        db.set_setting("k", "2").unwrap();
        assert_eq!(db.get_setting("k").unwrap().as_deref(), Some("2"));
    }
}
