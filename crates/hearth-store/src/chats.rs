//! SQLite CRUD for the `chats` table.

use rusqlite::{params, OptionalExtension};

use crate::codec::ChatRow;
use crate::database::Database;
use crate::error::Result;

const CHAT_COLUMNS: &str = "id, title, user_id, visibility, created_at, synced_at, is_dirty, local_version";

impl Database {
    /// Insert a chat, or overwrite every column of an existing one.  Either
    /// way `local_version` moves forward.
    pub fn upsert_chat(&self, row: &ChatRow) -> Result<()> {
        self.write_chat(row, ", local_version = chats.local_version + 1")?;
        Ok(())
    }

    /// Apply a pulled chat unless the local copy is dirty.  Returns `false`
    /// when the dirty local copy was kept.
    pub fn merge_clean_chat(&self, row: &ChatRow) -> Result<bool> {
        self.write_chat(row, " WHERE chats.is_dirty = 0")
    }

    fn write_chat(&self, row: &ChatRow, tail: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!("INSERT INTO chats (id, title, user_id, visibility, created_at, synced_at, is_dirty, local_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 user_id = excluded.user_id,
                 visibility = excluded.visibility,
                 created_at = excluded.created_at,
                 synced_at = excluded.synced_at,
                 is_dirty = excluded.is_dirty{tail}"
            ),
            params![
                row.id,
                row.title,
                row.user_id,
                row.visibility,
                row.created_at,
                row.synced_at,
                row.is_dirty,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn find_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id],
                row_to_chat,
            )
            .optional()?;
        Ok(row)
    }

    /// Chats owned by `user_id`, newest first.
    pub fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<ChatRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE user_id = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    pub fn dirty_chats(&self) -> Result<Vec<ChatRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE is_dirty = 1
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Delete a chat by id.  Returns `true` if a row was deleted.
    pub fn remove_chat(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        title: row.get(1)?,
        user_id: row.get(2)?,
        visibility: row.get(3)?,
        created_at: row.get(4)?,
        synced_at: row.get(5)?,
        is_dirty: row.get(6)?,
        local_version: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str, user: &str, created_at: i64) -> ChatRow {
        ChatRow {
            id: id.into(),
            title: format!("chat {id}"),
            user_id: user.into(),
            visibility: "private".into(),
            created_at,
            synced_at: None,
            is_dirty: 1,
            local_version: 0,
        }
    }

    #[test]
    fn upsert_overwrites_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let mut row = chat("c1", "u1", 10);
        db.upsert_chat(&row).unwrap();

        row.title = "renamed".into();
        row.is_dirty = 0;
        row.synced_at = Some(20);
        db.upsert_chat(&row).unwrap();

        let expected = ChatRow {
            local_version: 2,
            ..row
        };
        assert_eq!(db.find_chat("c1").unwrap(), Some(expected));
        assert!(db.dirty_chats().unwrap().is_empty());
    }

    #[test]
    fn list_is_scoped_and_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_chat(&chat("a", "u1", 1)).unwrap();
        db.upsert_chat(&chat("b", "u1", 2)).unwrap();
        db.upsert_chat(&chat("c", "u2", 3)).unwrap();

        let ids: Vec<_> = db
            .list_chats_for_user("u1")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn merge_skips_dirty_rows() {
        let db = Database::open_in_memory().unwrap();
        let local = chat("c1", "u1", 10);
        db.upsert_chat(&local).unwrap();

        let mut pulled = chat("c1", "u1", 10);
        pulled.title = "from server".into();
        pulled.is_dirty = 0;
        assert!(!db.merge_clean_chat(&pulled).unwrap());
        let kept = ChatRow {
            local_version: 1,
            ..local
        };
        assert_eq!(db.find_chat("c1").unwrap(), Some(kept));

        db.set_synced(hearth_shared::types::EntityKind::Chat, "c1", 11, 1)
            .unwrap();
        assert!(db.merge_clean_chat(&pulled).unwrap());
        let merged = db.find_chat("c1").unwrap().unwrap();
        assert_eq!(merged.title, "from server");
        // A pull is not a local save.
        assert_eq!(merged.local_version, 1);

        let fresh = ChatRow {
            id: "c2".into(),
            ..pulled
        };
        assert!(db.merge_clean_chat(&fresh).unwrap());
    }

    #[test]
    fn missing_chat_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.find_chat("nope").unwrap(), None);
        assert!(!db.remove_chat("nope").unwrap());
    }
}
