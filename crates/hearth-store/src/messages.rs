//! SQLite CRUD for the `messages` table.

use rusqlite::{params, OptionalExtension};

use crate::codec::MessageRow;
use crate::database::Database;
use crate::error::Result;

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at, synced_at, is_dirty, local_version";

impl Database {
    pub fn upsert_message(&self, row: &MessageRow) -> Result<()> {
        self.write_message(row, ", local_version = messages.local_version + 1")?;
        Ok(())
    }

    /// Apply a pulled message unless the local copy is dirty.  Returns `false`
    /// when the dirty local copy was kept.
    pub fn merge_clean_message(&self, row: &MessageRow) -> Result<bool> {
        self.write_message(row, " WHERE messages.is_dirty = 0")
    }

    fn write_message(&self, row: &MessageRow, tail: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!("INSERT INTO messages (id, chat_id, role, content, created_at, synced_at, is_dirty, local_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
             ON CONFLICT(id) DO UPDATE SET
                 chat_id = excluded.chat_id,
                 role = excluded.role,
                 content = excluded.content,
                 created_at = excluded.created_at,
                 synced_at = excluded.synced_at,
                 is_dirty = excluded.is_dirty{tail}"
            ),
            params![
                row.id,
                row.chat_id,
                row.role,
                row.content,
                row.created_at,
                row.synced_at,
                row.is_dirty,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn find_message(&self, id: &str) -> Result<Option<MessageRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(row)
    }

    /// Messages of a chat in conversation order.
    pub fn list_messages_for_chat(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![chat_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn dirty_messages(&self) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE is_dirty = 1
             ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Delete the messages of `chat_id` created at or after `since` (every
    /// message of the chat when `since` is `None`).  The removed rows are
    /// returned so the caller can record tombstones.
    pub fn remove_messages(&self, chat_id: &str, since: Option<i64>) -> Result<Vec<MessageRow>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let floor = since.unwrap_or(i64::MIN);

        let removed = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND created_at >= ?2
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![chat_id, floor], row_to_message)?;
            let mut removed = Vec::new();
            for row in rows {
                removed.push(row?);
            }
            removed
        };

        tx.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND created_at >= ?2",
            params![chat_id, floor],
        )?;
        tx.commit()?;

        Ok(removed)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        synced_at: row.get(5)?,
        is_dirty: row.get(6)?,
        local_version: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, chat: &str, created_at: i64) -> MessageRow {
        MessageRow {
            id: id.into(),
            chat_id: chat.into(),
            role: "user".into(),
            content: format!("message {id}"),
            created_at,
            synced_at: None,
            is_dirty: 1,
            local_version: 0,
        }
    }

    #[test]
    fn messages_are_listed_in_order() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_message(&message("m2", "c1", 20)).unwrap();
        db.upsert_message(&message("m1", "c1", 10)).unwrap();
        db.upsert_message(&message("x", "c2", 5)).unwrap();

        let ids: Vec<_> = db
            .list_messages_for_chat("c1")
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn remove_since_keeps_earlier_messages() {
        let db = Database::open_in_memory().unwrap();
        for (id, ts) in [("m1", 10), ("m2", 20), ("m3", 20), ("m4", 30)] {
            db.upsert_message(&message(id, "c1", ts)).unwrap();
        }

        let removed = db.remove_messages("c1", Some(20)).unwrap();
        assert_eq!(removed.len(), 3);

        let left = db.list_messages_for_chat("c1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "m1");
    }

    #[test]
    fn remove_all_only_touches_one_chat() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_message(&message("a", "c1", 1)).unwrap();
        db.upsert_message(&message("b", "c2", 1)).unwrap();

        assert_eq!(db.remove_messages("c1", None).unwrap().len(), 1);
        assert!(db.find_message("a").unwrap().is_none());
        assert!(db.find_message("b").unwrap().is_some());
    }
}
