use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use hearth_shared::protocol::ErrorBody;
use hearth_shared::HearthError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type not allowed: {0}")]
    UnsupportedMediaType(String),

    #[error("File storage error: {0}")]
    FileStorage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Active store error: {0}")]
    ActiveStore(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HearthError> for ServerError {
    fn from(e: HearthError) -> Self {
        match e {
            HearthError::FileTooLarge { size, max } => ServerError::FileTooLarge { size, max },
            HearthError::MimeNotAllowed(mime) => ServerError::UnsupportedMediaType(mime),
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ServerError::FileStorage(_) => {
                tracing::error!(error = %self, "File storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "File storage error".to_string())
            }
            ServerError::Database(_) | ServerError::ActiveStore(_) | ServerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
        };

        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}
