use thiserror::Error;

#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Unknown {field}: {value}")]
    UnknownVariant { field: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type not allowed: {0}")]
    MimeNotAllowed(String),
}
