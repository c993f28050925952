//! SQLite storage for queued upload payloads (`files`) and the upload queue
//! itself (`uploads`).

use rusqlite::{params, OptionalExtension};

use crate::codec::{FileRow, UploadRow};
use crate::database::Database;
use crate::error::Result;

const UPLOAD_COLUMNS: &str =
    "id, file_id, name, mime_type, size, created_at, status, remote_url, last_error, attempts";

impl Database {
    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Files are immutable: writing an existing id is a no-op.
    pub fn insert_file(&self, row: &FileRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO files (id, bytes, name, mime_type, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.bytes,
                row.name,
                row.mime_type,
                row.size,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_file(&self, id: &str) -> Result<Option<FileRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, bytes, name, mime_type, size, created_at FROM files WHERE id = ?1",
                params![id],
                |row| {
                    Ok(FileRow {
                        id: row.get(0)?,
                        bytes: row.get(1)?,
                        name: row.get(2)?,
                        mime_type: row.get(3)?,
                        size: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn remove_file(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------

    pub fn upsert_upload(&self, row: &UploadRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO uploads (id, file_id, name, mime_type, size, created_at, status, remote_url, last_error, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 remote_url = excluded.remote_url,
                 last_error = excluded.last_error,
                 attempts = excluded.attempts",
            params![
                row.id,
                row.file_id,
                row.name,
                row.mime_type,
                row.size,
                row.created_at,
                row.status,
                row.remote_url,
                row.last_error,
                row.attempts,
            ],
        )?;
        Ok(())
    }

    pub fn find_upload(&self, id: &str) -> Result<Option<UploadRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1"),
                params![id],
                row_to_upload,
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_uploads(&self) -> Result<Vec<UploadRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads ORDER BY created_at ASC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_upload)?;

        let mut uploads = Vec::new();
        for row in rows {
            uploads.push(row?);
        }
        Ok(uploads)
    }

    pub fn remove_upload(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM uploads WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadRow> {
    Ok(UploadRow {
        id: row.get(0)?,
        file_id: row.get(1)?,
        name: row.get(2)?,
        mime_type: row.get(3)?,
        size: row.get(4)?,
        created_at: row.get(5)?,
        status: row.get(6)?,
        remote_url: row.get(7)?,
        last_error: row.get(8)?,
        attempts: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_bytes_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let row = FileRow {
            id: "f1".into(),
            bytes: vec![0, 1, 2, 255],
            name: "raw.bin".into(),
            mime_type: "application/zip".into(),
            size: 4,
            created_at: 7,
        };
        db.insert_file(&row).unwrap();
        assert_eq!(db.find_file("f1").unwrap(), Some(row));
        assert!(db.remove_file("f1").unwrap());
        assert!(db.find_file("f1").unwrap().is_none());
    }

    #[test]
    fn upload_status_updates_in_place() {
        let db = Database::open_in_memory().unwrap();
        let mut row = UploadRow {
            id: "u1".into(),
            file_id: "f1".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size: 1,
            created_at: 1,
            status: "pending".into(),
            remote_url: None,
            last_error: None,
            attempts: 0,
        };
        db.upsert_upload(&row).unwrap();

        row.status = "success".into();
        row.remote_url = Some("https://files.example/a.txt".into());
        db.upsert_upload(&row).unwrap();

        let all = db.all_uploads().unwrap();
        assert_eq!(all, vec![row]);
    }
}
