//! SQLite CRUD for the `documents` table.

use rusqlite::{params, OptionalExtension};

use crate::codec::DocumentRow;
use crate::database::Database;
use crate::error::Result;

const DOCUMENT_COLUMNS: &str =
    "id, title, kind, content, user_id, created_at, synced_at, is_dirty, local_version";

impl Database {
    pub fn upsert_document(&self, row: &DocumentRow) -> Result<()> {
        self.write_document(row, ", local_version = documents.local_version + 1")?;
        Ok(())
    }

    /// Apply a pulled document unless the local copy is dirty.  Returns `false`
    /// when the dirty local copy was kept.
    pub fn merge_clean_document(&self, row: &DocumentRow) -> Result<bool> {
        self.write_document(row, " WHERE documents.is_dirty = 0")
    }

    fn write_document(&self, row: &DocumentRow, tail: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!("INSERT INTO documents (id, title, kind, content, user_id, created_at, synced_at, is_dirty, local_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title,
                 kind = excluded.kind,
                 content = excluded.content,
                 user_id = excluded.user_id,
                 created_at = excluded.created_at,
                 synced_at = excluded.synced_at,
                 is_dirty = excluded.is_dirty{tail}"
            ),
            params![
                row.id,
                row.title,
                row.kind,
                row.content,
                row.user_id,
                row.created_at,
                row.synced_at,
                row.is_dirty,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn find_document(&self, id: &str) -> Result<Option<DocumentRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                row_to_document,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_documents_for_user(&self, user_id: &str) -> Result<Vec<DocumentRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE user_id = ?1
             ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_document)?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?);
        }
        Ok(documents)
    }

    pub fn dirty_documents(&self) -> Result<Vec<DocumentRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE is_dirty = 1
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_document)?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?);
        }
        Ok(documents)
    }

    pub fn remove_document(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: row.get(2)?,
        content: row.get(3)?,
        user_id: row.get(4)?,
        created_at: row.get(5)?,
        synced_at: row.get(6)?,
        is_dirty: row.get(7)?,
        local_version: row.get(8)?,
    })
}
