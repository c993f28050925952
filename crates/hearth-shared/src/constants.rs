/// Application name
pub const APP_NAME: &str = "Hearth";

/// Maximum accepted upload size in bytes (20 MiB)
pub const MAX_UPLOAD_SIZE: u64 = 20 * 1024 * 1024;

/// Default interval between background sync cycles
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Connectivity changes shorter than this are ignored
pub const DEFAULT_CONNECTIVITY_DEBOUNCE_MS: u64 = 300;

/// Delay between coming online and draining the upload queue
pub const DEFAULT_DRAIN_SETTLE_MS: u64 = 1_500;

/// Upload backoff: first retry delay, ceiling, and attempts per drain
pub const DEFAULT_UPLOAD_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_UPLOAD_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;

/// Drain cycles an upload may fail before it needs an explicit retry
pub const DEFAULT_UPLOAD_RETRY_BUDGET: u32 = 3;

/// Messages archived per `sync_session` call
pub const DEFAULT_ARCHIVE_BATCH_SIZE: usize = 100;

/// Keys requested per active-store scan page
pub const ARCHIVE_SCAN_COUNT: usize = 100;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// MIME types accepted by the upload endpoint. Entries ending in `/` match a
/// whole top-level type.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/rtf",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/typescript",
    "application/x-sh",
    "application/x-python",
    "text/",
    "application/zip",
    "application/x-zip-compressed",
    "application/gzip",
    "application/x-tar",
    "application/x-7z-compressed",
    "application/vnd.rar",
];

/// Whether `mime` is on the upload allow-list. Parameters such as
/// `; charset=utf-8` are ignored.
pub fn is_allowed_mime(mime: &str) -> bool {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if essence.is_empty() {
        return false;
    }
    ALLOWED_MIME_TYPES.iter().any(|allowed| {
        if allowed.ends_with('/') {
            essence.starts_with(allowed) && essence.len() > allowed.len()
        } else {
            essence == *allowed
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_matches_families_and_exact_types() {
        assert!(is_allowed_mime("image/png"));
        assert!(is_allowed_mime("text/markdown; charset=utf-8"));
        assert!(is_allowed_mime("application/pdf"));
        assert!(is_allowed_mime("application/zip"));
        assert!(!is_allowed_mime("application/x-msdownload"));
        assert!(!is_allowed_mime("image/"));
        assert!(!is_allowed_mime(""));
    }
}
