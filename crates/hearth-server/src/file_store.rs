//! Content-addressed storage for uploaded attachments.
//!
//! A file is stored as `{blake3-hex}.{ext}` under the base directory, so the
//! same bytes always get the same name and a repeated upload is a no-op.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use hearth_shared::constants::is_allowed_mime;

use crate::error::ServerError;

/// Extension for each accepted MIME type; also used in reverse on download.
const EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("application/pdf", "pdf"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/vnd.ms-excel", "xls"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/rtf", "rtf"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/plain", "txt"),
    ("text/markdown", "md"),
    ("text/csv", "csv"),
    ("text/html", "html"),
    ("application/zip", "zip"),
    ("application/gzip", "gz"),
    ("application/x-tar", "tar"),
    ("application/x-7z-compressed", "7z"),
    ("application/vnd.rar", "rar"),
];

/// Verify that a resolved path stays within the base directory.
fn ensure_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::BadRequest("Invalid file name".to_string()));
            }
        }
    }
    if resolved.parent() != Some(base) {
        return Err(ServerError::BadRequest("Invalid file name".to_string()));
    }
    Ok(resolved)
}

/// A stored name is 64 lowercase hex chars, optionally followed by a short
/// alphanumeric extension.
fn is_valid_stored_name(name: &str) -> bool {
    let (hash, ext) = match name.split_once('.') {
        Some((hash, ext)) => (hash, Some(ext)),
        None => (name, None),
    };
    let hash_ok = hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    let ext_ok = ext.map_or(true, |e| {
        !e.is_empty() && e.len() <= 10 && e.bytes().all(|b| b.is_ascii_alphanumeric())
    });
    hash_ok && ext_ok
}

/// Pick the stored extension: the known one for `mime`, else the original
/// file's extension if it is short and alphanumeric, else `bin`.
fn extension_for(mime: &str, original_name: Option<&str>) -> String {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    if let Some((_, ext)) = EXTENSIONS.iter().find(|(m, _)| m.eq_ignore_ascii_case(essence)) {
        return (*ext).to_string();
    }
    original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.bytes().all(|b| b.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

/// Content type served for a stored name.
pub fn content_type_for(stored_name: &str) -> &'static str {
    let ext = stored_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    EXTENSIONS
        .iter()
        .find(|(_, e)| *e == ext)
        .map(|(m, _)| *m)
        .unwrap_or("application/octet-stream")
}

#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_size: u64,
}

impl FileStore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create file directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let base_path = base_path.canonicalize().unwrap_or(base_path);
        info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Validate and store `data`.  Returns the stored name.
    pub async fn store(
        &self,
        data: &[u8],
        mime: &str,
        original_name: Option<&str>,
    ) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        let size = data.len() as u64;
        if size > self.max_size {
            return Err(ServerError::FileTooLarge {
                size,
                max: self.max_size,
            });
        }
        if !is_allowed_mime(mime) {
            return Err(ServerError::UnsupportedMediaType(mime.to_string()));
        }

        let hash = blake3::hash(data).to_hex();
        let stored_name = format!("{}.{}", hash, extension_for(mime, original_name));
        let path = ensure_within(&self.base_path, &stored_name)?;

        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(name = %stored_name, "File already stored");
            return Ok(stored_name);
        }

        // Write to a temp name first so a reader never sees a partial file.
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, data)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write {stored_name}: {e}")))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to move {stored_name}: {e}")))?;

        debug!(name = %stored_name, size, "Stored file");
        Ok(stored_name)
    }

    pub async fn get(&self, stored_name: &str) -> Result<Vec<u8>, ServerError> {
        if !is_valid_stored_name(stored_name) {
            return Err(ServerError::BadRequest("Invalid file name".to_string()));
        }
        let path = ensure_within(&self.base_path, stored_name)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::NotFound(stored_name.to_string()))
            }
            Err(e) => Err(ServerError::FileStorage(format!(
                "Failed to read {stored_name}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let (store, _dir) = test_store().await;
        let name = store.store(b"hello", "text/plain", Some("a.txt")).await.unwrap();
        assert!(name.ends_with(".txt"));
        assert!(is_valid_stored_name(&name));
        assert_eq!(store.get(&name).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_same_bytes_same_name() {
        let (store, _dir) = test_store().await;
        let a = store.store(b"same", "image/png", None).await.unwrap();
        let b = store.store(b"same", "image/png", Some("other.png")).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_limits() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.store(&[0u8; 2048], "image/png", None).await,
            Err(ServerError::FileTooLarge { size: 2048, max: 1024 })
        ));
        assert!(matches!(
            store.store(b"MZ", "application/x-msdownload", None).await,
            Err(ServerError::UnsupportedMediaType(_))
        ));
        assert!(store.store(b"", "text/plain", None).await.is_err());
    }

    #[tokio::test]
    async fn test_get_rejects_traversal_and_missing() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(ServerError::BadRequest(_))
        ));
        let missing = format!("{}.png", "0".repeat(64));
        assert!(matches!(store.get(&missing).await, Err(ServerError::NotFound(_))));
    }

    #[test]
    fn test_extension_fallbacks() {
        assert_eq!(extension_for("image/jpeg", Some("x.jpeg")), "jpg");
        assert_eq!(extension_for("text/x-rust", Some("main.RS")), "rs");
        assert_eq!(extension_for("text/x-unknown", Some("noext")), "bin");
        assert_eq!(content_type_for(&format!("{}.pdf", "a".repeat(64))), "application/pdf");
        assert_eq!(content_type_for("whatever.rs"), "application/octet-stream");
    }
}
