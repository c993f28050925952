//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use hearth_shared::constants::{DEFAULT_ARCHIVE_BATCH_SIZE, DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database holding synced records, the message archive and the
    /// archive watermarks.
    /// Env: `DATABASE_PATH`
    /// Default: `./hearth-server.db`
    pub database_path: PathBuf,

    /// Directory where uploaded files are stored.
    /// Env: `FILE_STORAGE_PATH`
    /// Default: `./files`
    pub file_storage_path: PathBuf,

    /// Prefix of the URLs returned for uploaded files.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Maximum upload size in bytes (20 MiB).
    pub max_upload_size: u64,

    /// Admin API bearer token. Required for `/api/admin/*`.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Messages archived per session per call.
    /// Env: `ARCHIVE_BATCH_SIZE`
    /// Default: `100`
    pub archive_batch_size: usize,

    /// Run a full archival pass every N seconds (0 = only on admin request).
    /// Env: `ARCHIVE_INTERVAL_SECS`
    /// Default: `0`
    pub archive_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./hearth-server.db"),
            file_storage_path: PathBuf::from("./files"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_upload_size: MAX_UPLOAD_SIZE,
            admin_token: None,
            archive_batch_size: DEFAULT_ARCHIVE_BATCH_SIZE,
            archive_interval_secs: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Ok(val) = std::env::var("ARCHIVE_BATCH_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.archive_batch_size = n,
                _ => tracing::warn!(value = %val, "Invalid ARCHIVE_BATCH_SIZE, using default"),
            }
        }

        if let Ok(val) = std::env::var("ARCHIVE_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.archive_interval_secs = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Public URL of a stored file.
    pub fn file_url(&self, stored_name: &str) -> String {
        format!("{}/api/files/{}", self.public_base_url, stored_name)
    }
}
