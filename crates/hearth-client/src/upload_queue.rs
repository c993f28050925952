//! Offline file upload queue.
//!
//! Enqueuing writes twice: metadata goes into an in-memory log the UI can read
//! synchronously ("3 files pending"), and the payload goes to the local store
//! as a [`StoredFile`] next to a durable copy of the queue item.  Draining
//! uploads every pending item concurrently; each item retries with capped
//! exponential backoff on its own, so one slow file never holds up another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_shared::constants::{is_allowed_mime, MAX_UPLOAD_SIZE};
use hearth_shared::protocol::UploadResponse;
use hearth_shared::types::{AttachmentMetadata, QueuedFileUpload, StoredFile, UploadStatus};
use hearth_shared::HearthError;
use hearth_store::Storage;

use crate::connectivity::{ConnectivityEvent, ConnectivityObserver};
use crate::error::{ClientError, Result};
use crate::remote::check;

/// Transport for one file.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &StoredFile) -> Result<UploadResponse>;
}

/// [`Uploader`] posting `multipart/form-data` to `/api/files/upload`.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client, server_url: &str) -> Self {
        Self {
            client,
            url: format!("{}/api/files/upload", server_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &StoredFile) -> Result<UploadResponse> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self.client.post(&self.url).multipart(form).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts per item within one drain.
    pub max_attempts: u32,
    /// Drains an item may end in `Error` before it needs [`UploadQueue::retry`].
    pub retry_budget: u32,
}

impl UploadPolicy {
    /// Backoff after failed attempt number `attempt` (1-based), with up to 25%
    /// jitter, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let capped = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
        let jitter_ms = capped.as_millis() as u64 / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        (capped + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

enum Attempt {
    Uploaded(UploadResponse),
    Failed(String),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

pub struct UploadQueue {
    storage: Arc<Storage>,
    uploader: Arc<dyn Uploader>,
    policy: UploadPolicy,
    items: RwLock<Vec<QueuedFileUpload>>,
    metadata: RwLock<Vec<AttachmentMetadata>>,
    shutdown: watch::Sender<bool>,
    /// Keeps `created_at` strictly increasing so the durable order matches
    /// the log order.
    last_created_ms: AtomicU64,
}

impl UploadQueue {
    pub fn new(storage: Arc<Storage>, uploader: Arc<dyn Uploader>, policy: UploadPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage,
            uploader,
            policy,
            items: RwLock::new(Vec::new()),
            metadata: RwLock::new(Vec::new()),
            shutdown,
            last_created_ms: AtomicU64::new(0),
        }
    }

    /// Validate and queue a file.  Returns the queue item id.
    pub fn enqueue(
        &self,
        bytes: Vec<u8>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
    ) -> Result<Uuid> {
        let name = name.into();
        let mime_type = mime_type.into();

        let actual = size.max(bytes.len() as u64);
        if actual > MAX_UPLOAD_SIZE {
            return Err(HearthError::FileTooLarge {
                size: actual,
                max: MAX_UPLOAD_SIZE,
            }
            .into());
        }
        if !is_allowed_mime(&mime_type) {
            return Err(HearthError::MimeNotAllowed(mime_type).into());
        }

        let created_at = self.next_created_at();
        let file = StoredFile {
            id: Uuid::new_v4(),
            bytes,
            name: name.clone(),
            mime_type: mime_type.clone(),
            size: actual,
            created_at,
        };
        let item = QueuedFileUpload {
            id: Uuid::new_v4(),
            file_id: file.id,
            name,
            mime_type,
            size: actual,
            created_at,
            status: UploadStatus::Pending,
            remote_url: None,
            last_error: None,
            attempts: 0,
        };

        self.write_items().push(item.clone());

        let persisted = self
            .storage
            .save_file(&file)
            .and_then(|()| self.storage.save_upload(&item));
        if let Err(e) = persisted {
            self.write_items().retain(|i| i.id != item.id);
            return Err(e.into());
        }

        debug!(id = %item.id, name = %item.name, size = item.size, "File queued");
        Ok(item.id)
    }

    /// Upload every pending item.  `Error` items still within the retry budget
    /// are put back to `Pending` first.  Returns the items this drain
    /// processed, in their final state.
    pub async fn drain(&self) -> Vec<QueuedFileUpload> {
        let batch = self.take_pending();
        if batch.is_empty() {
            return Vec::new();
        }

        info!(count = batch.len(), "Draining upload queue");
        join_all(batch.into_iter().map(|item| self.process(item))).await
    }

    /// Whether a not-yet-uploaded item called `name` is in the queue.
    pub fn is_queued(&self, name: &str) -> bool {
        self.read_items()
            .iter()
            .any(|i| i.name == name && i.status != UploadStatus::Success)
    }

    /// Attachments of every successful upload, in completion order.
    pub fn metadata_snapshot(&self) -> Vec<AttachmentMetadata> {
        self.metadata
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn items(&self) -> Vec<QueuedFileUpload> {
        self.read_items().clone()
    }

    /// Items waiting for or in the middle of an upload.
    pub fn pending_count(&self) -> usize {
        self.read_items()
            .iter()
            .filter(|i| matches!(i.status, UploadStatus::Pending | UploadStatus::Uploading))
            .count()
    }

    /// Put an `Error` item back to `Pending` with a fresh retry budget.
    pub fn retry(&self, id: Uuid) -> bool {
        let updated = {
            let mut items = self.write_items();
            match items
                .iter_mut()
                .find(|i| i.id == id && i.status == UploadStatus::Error)
            {
                Some(item) => {
                    item.status = UploadStatus::Pending;
                    item.attempts = 0;
                    item.last_error = None;
                    item.clone()
                }
                None => return false,
            }
        };
        self.persist(&updated);
        true
    }

    /// Reload the log from the local store.  Items interrupted mid-upload go
    /// back to `Pending`.
    pub fn restore(&self) -> usize {
        let mut loaded = self.storage.get_uploads();
        let mut metadata = Vec::new();

        for item in &mut loaded {
            match item.status {
                UploadStatus::Uploading => {
                    item.status = UploadStatus::Pending;
                    self.persist(item);
                }
                UploadStatus::Success => {
                    if let Some(url) = &item.remote_url {
                        metadata.push(AttachmentMetadata {
                            url: url.clone(),
                            name: item.name.clone(),
                            content_type: item.mime_type.clone(),
                        });
                    }
                }
                UploadStatus::Pending | UploadStatus::Error => {}
            }
        }

        if let Some(last) = loaded.last() {
            let ms = last.created_at.timestamp_millis().max(0) as u64;
            self.last_created_ms.fetch_max(ms, Ordering::AcqRel);
        }

        let count = loaded.len();
        *self.write_items() = loaded;
        if let Ok(mut m) = self.metadata.write() {
            *m = metadata;
        }
        info!(count, "Upload queue restored");
        count
    }

    /// Cancel every backoff wait in progress.  Items waiting on one return to
    /// `Pending`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Drain after each offline-to-online transition, once the connection has
    /// been up for `settle`.
    pub fn spawn_auto_drain(
        self: Arc<Self>,
        connectivity: Arc<ConnectivityObserver>,
        settle: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = connectivity.subscribe();
            let mut shutdown = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ConnectivityEvent::Online) => {
                            tokio::select! {
                                _ = tokio::time::sleep(settle) => {}
                                _ = shutdown_signal(&mut shutdown) => break,
                            }
                            if connectivity.is_online() {
                                self.drain().await;
                            }
                        }
                        Ok(ConnectivityEvent::Offline) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_signal(&mut shutdown) => break,
                }
            }
            debug!("Upload auto-drain stopped");
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn next_created_at(&self) -> chrono::DateTime<Utc> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let prev = self
            .last_created_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(now);
        let ms = now.max(prev + 1) as i64;
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    fn read_items(&self) -> std::sync::RwLockReadGuard<'_, Vec<QueuedFileUpload>> {
        self.items.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_items(&self) -> std::sync::RwLockWriteGuard<'_, Vec<QueuedFileUpload>> {
        self.items.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Requeue retryable errors, then flip every `Pending` item to
    /// `Uploading` under one write lock so a concurrent drain cannot pick the
    /// same item.
    fn take_pending(&self) -> Vec<QueuedFileUpload> {
        let batch: Vec<QueuedFileUpload> = {
            let mut items = self.write_items();
            for item in items.iter_mut() {
                if item.status == UploadStatus::Error && item.attempts < self.policy.retry_budget {
                    item.status = UploadStatus::Pending;
                }
            }
            items
                .iter_mut()
                .filter(|i| i.status == UploadStatus::Pending)
                .map(|i| {
                    i.status = UploadStatus::Uploading;
                    i.clone()
                })
                .collect()
        };
        for item in &batch {
            self.persist(item);
        }
        batch
    }

    async fn process(&self, mut item: QueuedFileUpload) -> QueuedFileUpload {
        let outcome = match self.storage.get_file(item.file_id) {
            Some(file) => self.upload_with_backoff(&file).await,
            None => Attempt::Failed(ClientError::MissingFile(item.file_id).to_string()),
        };

        match outcome {
            Attempt::Uploaded(resp) => {
                info!(id = %item.id, url = %resp.url, "Upload succeeded");
                item.status = UploadStatus::Success;
                item.remote_url = Some(resp.url.clone());
                item.last_error = None;
                if let Ok(mut m) = self.metadata.write() {
                    m.push(AttachmentMetadata {
                        url: resp.url,
                        name: item.name.clone(),
                        content_type: resp.content_type,
                    });
                }
                if let Err(e) = self.storage.delete_file(item.file_id) {
                    warn!(id = %item.id, error = %e, "Failed to drop uploaded bytes");
                }
            }
            Attempt::Failed(message) => {
                warn!(id = %item.id, error = %message, "Upload failed");
                item.status = UploadStatus::Error;
                item.last_error = Some(message);
                item.attempts += 1;
            }
            Attempt::Cancelled => {
                debug!(id = %item.id, "Upload cancelled by shutdown");
                item.status = UploadStatus::Pending;
            }
        }

        self.persist(&item);
        if let Some(slot) = self.write_items().iter_mut().find(|i| i.id == item.id) {
            *slot = item.clone();
        }
        item
    }

    async fn upload_with_backoff(&self, file: &StoredFile) -> Attempt {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.uploader.upload(file).await {
                Ok(resp) => return Attempt::Uploaded(resp),
                Err(e) if attempt >= self.policy.max_attempts || !e.is_transient() => {
                    return Attempt::Failed(e.to_string());
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(file = %file.id, attempt, ?delay, error = %e, "Upload attempt failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_signal(&mut shutdown) => return Attempt::Cancelled,
                    }
                }
            }
        }
    }

    fn persist(&self, item: &QueuedFileUpload) {
        if let Err(e) = self.storage.save_upload(item) {
            warn!(id = %item.id, error = %e, "Failed to persist upload state");
        }
    }
}

/// Resolves once the shutdown flag is `true`.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
