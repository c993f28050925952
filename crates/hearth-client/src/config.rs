//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so an embedding application can start the
//! client with zero configuration against a local server.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hearth_shared::constants::{
    DEFAULT_CONNECTIVITY_DEBOUNCE_MS, DEFAULT_DRAIN_SETTLE_MS, DEFAULT_HTTP_PORT,
    DEFAULT_SYNC_INTERVAL_SECS, DEFAULT_UPLOAD_BASE_DELAY_MS, DEFAULT_UPLOAD_MAX_ATTEMPTS,
    DEFAULT_UPLOAD_MAX_DELAY_MS, DEFAULT_UPLOAD_RETRY_BUDGET,
};

use crate::upload_queue::UploadPolicy;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server of record.
    /// Env: `HEARTH_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Explicit local database path. `None` uses the platform data directory.
    /// Env: `HEARTH_DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Env: `HEARTH_SYNC_INTERVAL_SECS`
    pub sync_interval: Duration,

    /// Env: `HEARTH_DEBOUNCE_MS`
    pub connectivity_debounce: Duration,

    /// How often the health check checks the server.
    /// Env: `HEARTH_HEALTH_INTERVAL_SECS`
    pub health_interval: Duration,

    /// Delay between coming online and draining uploads.
    /// Env: `HEARTH_DRAIN_SETTLE_MS`
    pub drain_settle: Duration,

    /// Per-request HTTP timeout.
    /// Env: `HEARTH_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    /// Env: `HEARTH_UPLOAD_BASE_DELAY_MS`, `HEARTH_UPLOAD_MAX_DELAY_MS`,
    /// `HEARTH_UPLOAD_MAX_ATTEMPTS`, `HEARTH_UPLOAD_RETRY_BUDGET`
    pub upload: UploadPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            database_path: None,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            connectivity_debounce: Duration::from_millis(DEFAULT_CONNECTIVITY_DEBOUNCE_MS),
            health_interval: Duration::from_secs(10),
            drain_settle: Duration::from_millis(DEFAULT_DRAIN_SETTLE_MS),
            request_timeout: Duration::from_secs(30),
            upload: UploadPolicy {
                base_delay: Duration::from_millis(DEFAULT_UPLOAD_BASE_DELAY_MS),
                max_delay: Duration::from_millis(DEFAULT_UPLOAD_MAX_DELAY_MS),
                max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
                retry_budget: DEFAULT_UPLOAD_RETRY_BUDGET,
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("HEARTH_SERVER_URL") {
            let url = url.trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.server_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid HEARTH_SERVER_URL, using default");
            }
        }

        if let Some(path) = lookup("HEARTH_DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = parse(&lookup, "HEARTH_SYNC_INTERVAL_SECS") {
            if secs > 0 {
                config.sync_interval = Duration::from_secs(secs);
            }
        }
        if let Some(ms) = parse(&lookup, "HEARTH_DEBOUNCE_MS") {
            config.connectivity_debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, "HEARTH_HEALTH_INTERVAL_SECS") {
            if secs > 0 {
                config.health_interval = Duration::from_secs(secs);
            }
        }
        if let Some(ms) = parse(&lookup, "HEARTH_DRAIN_SETTLE_MS") {
            config.drain_settle = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, "HEARTH_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        // -- Upload backoff --

        if let Some(ms) = parse(&lookup, "HEARTH_UPLOAD_BASE_DELAY_MS") {
            config.upload.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "HEARTH_UPLOAD_MAX_DELAY_MS") {
            config.upload.max_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<u32>(&lookup, "HEARTH_UPLOAD_MAX_ATTEMPTS") {
            config.upload.max_attempts = n.max(1);
        }
        if let Some(n) = parse(&lookup, "HEARTH_UPLOAD_RETRY_BUDGET") {
            config.upload.retry_budget = n;
        }

        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
