use thiserror::Error;

use hearth_shared::HearthError;
use hearth_store::StoreError;

/// Errors produced by the client crate.
///
/// None of these escape a sync cycle or a drain: they are logged there and
/// folded into the returned report or the upload item.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Not found on server")]
    NotFound,

    #[error("Rejected: {0}")]
    Rejected(#[from] HearthError),

    #[error("Stored bytes missing for file {0}")]
    MissingFile(uuid::Uuid),
}

impl ClientError {
    /// Transport-level failures that are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
