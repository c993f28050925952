//! # hearth-client
//!
//! Offline-first client core: everything the UI saves lands in local storage
//! first and is reconciled with the server in the background.
//!
//! [`Client`] wires the pieces together:
//! - [`hearth_store::Storage`] for local records
//! - [`ConnectivityObserver`] fed by a [`HealthCheck`]
//! - [`SyncEngine`] for push/pull cycles
//! - [`UploadQueue`] for file attachments

pub mod config;
pub mod connectivity;
pub mod error;
pub mod remote;
pub mod sync;
pub mod upload_queue;

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use hearth_shared::types::{ChatRecord, DocumentRecord, MessageRecord};
use hearth_store::Storage;

pub use config::ClientConfig;
pub use connectivity::{ConnectivityEvent, ConnectivityObserver, HealthCheck};
pub use error::{ClientError, Result};
pub use remote::{HttpRemote, RemoteApi};
pub use sync::{SyncEngine, SyncPhase, SyncReport};
pub use upload_queue::{HttpUploader, UploadPolicy, UploadQueue, Uploader};

/// Install the default `tracing` subscriber.  `RUST_LOG` overrides the
/// filter.  Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hearth_client=debug,hearth_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

pub struct Client {
    storage: Arc<Storage>,
    connectivity: Arc<ConnectivityObserver>,
    sync: Arc<SyncEngine>,
    uploads: Arc<UploadQueue>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Open local storage and start the background tasks against the HTTP
    /// server in `config`.  Must be called inside a tokio runtime.
    pub fn start(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let storage = Arc::new(match &config.database_path {
            Some(path) => Storage::open(path),
            None => Storage::open_default(),
        });

        let remote = Arc::new(HttpRemote::new(http.clone(), &config.server_url));
        let uploader = Arc::new(HttpUploader::new(http.clone(), &config.server_url));
        let client = Self::with_parts(&config, storage, remote, uploader);

        let checker = HealthCheck::new(http, &config.server_url, config.health_interval);
        client.track(checker.spawn(client.connectivity.clone(), client.shutdown.subscribe()));

        info!(
            server = %config.server_url,
            backend = client.storage.backend(),
            "Hearth client started"
        );
        Ok(client)
    }

    /// Assemble a client from explicit parts.  No health check is started;
    /// feed connectivity through [`Client::connectivity`].
    pub fn with_parts(
        config: &ClientConfig,
        storage: Arc<Storage>,
        remote: Arc<dyn RemoteApi>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let connectivity = ConnectivityObserver::spawn(config.connectivity_debounce);
        let sync = Arc::new(SyncEngine::new(storage.clone(), remote));
        let uploads = Arc::new(UploadQueue::new(storage.clone(), uploader, config.upload));
        uploads.restore();

        let client = Self {
            storage,
            connectivity: connectivity.clone(),
            sync: sync.clone(),
            uploads: uploads.clone(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        };

        client.track(sync.spawn(
            connectivity.clone(),
            config.sync_interval,
            client.shutdown.subscribe(),
        ));
        client.track(uploads.spawn_auto_drain(connectivity, config.drain_settle));
        client
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    // -- records -----------------------------------------------------------

    pub fn save_chat(&self, chat: ChatRecord) -> Result<Uuid> {
        Ok(self.storage.save_chat(chat)?)
    }

    pub fn get_chat(&self, id: Uuid) -> Option<ChatRecord> {
        self.storage.get_chat(id)
    }

    pub fn get_chats(&self, user_id: &str) -> Vec<ChatRecord> {
        self.storage.get_chats(user_id)
    }

    pub fn save_message(&self, message: MessageRecord) -> Result<Uuid> {
        Ok(self.storage.save_message(message)?)
    }

    pub fn get_messages(&self, chat_id: Uuid) -> Vec<MessageRecord> {
        self.storage.get_messages(chat_id)
    }

    pub fn delete_chat_and_messages(&self, chat_id: Uuid) -> Result<usize> {
        Ok(self.storage.delete_chat_and_messages(chat_id)?)
    }

    pub fn delete_trailing_messages(&self, message_id: Uuid) -> Result<usize> {
        Ok(self.storage.delete_trailing_messages(message_id)?)
    }

    pub fn save_document(&self, document: DocumentRecord) -> Result<Uuid> {
        Ok(self.storage.save_document(document)?)
    }

    pub fn get_document(&self, id: Uuid) -> Option<DocumentRecord> {
        self.storage.get_document(id)
    }

    pub fn get_documents(&self, user_id: &str) -> Vec<DocumentRecord> {
        self.storage.get_documents(user_id)
    }

    pub fn delete_document(&self, id: Uuid) -> Result<bool> {
        Ok(self.storage.delete_document(id)?)
    }

    // -- sync --------------------------------------------------------------

    /// Run a cycle now.  `None` when one is already running.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.sync.run_cycle().await
    }

    /// Derived from local dirty flags, independent of any sync outcome.
    pub fn has_pending_changes(&self) -> bool {
        self.storage.has_unsynced_changes()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn is_using_fallback(&self) -> bool {
        self.storage.is_using_fallback()
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityObserver> {
        &self.connectivity
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn uploads(&self) -> &Arc<UploadQueue> {
        &self.uploads
    }

    /// Stop background tasks and cancel upload backoffs.  A cycle already in
    /// progress runs to completion.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.uploads.shutdown();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            let _ = task.await;
        }
        info!("Hearth client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use hearth_shared::protocol::UploadResponse;
    use hearth_shared::types::{Role, StoredFile};

    use crate::sync::tests::MockRemote;

    struct InstantUploader;

    #[async_trait]
    impl Uploader for InstantUploader {
        async fn upload(&self, file: &StoredFile) -> Result<UploadResponse> {
            Ok(UploadResponse {
                url: format!("https://files.test/{}", file.id),
                stored_name: file.id.to_string(),
                content_type: file.mime_type.clone(),
            })
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            sync_interval: Duration::from_secs(3_600),
            connectivity_debounce: Duration::from_millis(20),
            drain_settle: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn offline_edits_sync_once_when_back_online() {
        let remote = Arc::new(MockRemote::default());
        let client = Client::with_parts(
            &test_config(),
            Arc::new(Storage::in_memory()),
            remote.clone(),
            Arc::new(InstantUploader),
        );

        client.connectivity().report(false);
        eventually(|| !client.is_online()).await;

        let chat = ChatRecord::new("Test", "user-1");
        let chat_id = client.save_chat(chat).unwrap();
        let msg_id = client
            .save_message(MessageRecord::new(chat_id, Role::User, "hi"))
            .unwrap();
        assert!(client.has_pending_changes());

        client.connectivity().report(true);
        eventually(|| !client.has_pending_changes()).await;

        assert!(!client.get_chat(chat_id).unwrap().is_dirty);
        assert!(!client.get_messages(chat_id)[0].is_dirty);
        assert_eq!(remote.push_count(chat_id), 1);
        assert_eq!(remote.push_count(msg_id), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn uploads_drain_after_reconnect() {
        let client = Client::with_parts(
            &test_config(),
            Arc::new(Storage::in_memory()),
            Arc::new(MockRemote::default()),
            Arc::new(InstantUploader),
        );

        client.connectivity().report(false);
        eventually(|| !client.is_online()).await;

        client
            .uploads()
            .enqueue(b"img".to_vec(), "cat.png", "image/png", 3)
            .unwrap();
        assert_eq!(client.uploads().pending_count(), 1);

        client.connectivity().report(true);
        eventually(|| client.uploads().pending_count() == 0).await;
        assert_eq!(client.uploads().metadata_snapshot().len(), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn unopenable_database_still_serves_reads_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            database_path: Some(dir.path().join("missing").join("hearth.db")),
            server_url: "http://127.0.0.1:9".into(),
            ..test_config()
        };
        let client = Client::start(config).unwrap();
        assert!(client.is_using_fallback());

        let id = client.save_chat(ChatRecord::new("still works", "u")).unwrap();
        assert_eq!(client.get_chat(id).unwrap().title, "still works");
        assert!(client.has_pending_changes());

        client.shutdown().await;
    }
}
