use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A row could not be mapped back into a domain record.
    #[error("Corrupt {table} row {id}: {reason}")]
    Decode {
        table: &'static str,
        id: String,
        reason: String,
    },

    /// The connection mutex was poisoned by a panicking thread.
    #[error("Store lock poisoned")]
    Poisoned,

    /// The backing engine refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
