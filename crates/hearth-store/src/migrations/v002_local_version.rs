//! v002 -- Per-row local version counter.
//!
//! Every local save bumps `local_version`.  A push acknowledgment only clears
//! the dirty flag when the row still carries the version that was pushed.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE chats     ADD COLUMN local_version INTEGER NOT NULL DEFAULT 0;
ALTER TABLE messages  ADD COLUMN local_version INTEGER NOT NULL DEFAULT 0;
ALTER TABLE documents ADD COLUMN local_version INTEGER NOT NULL DEFAULT 0;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
