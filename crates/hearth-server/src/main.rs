//! # hearth-server
//!
//! Server of record for Hearth clients.
//!
//! This binary provides:
//! - **Sync API**: idempotent push, delete and incremental pull of chats,
//!   messages and documents
//! - **File uploads** stored under their content hash
//! - **Active sessions**: in-progress messages kept in a fast store and
//!   archived into SQLite in batches

mod active_store;
mod api;
mod archive;
mod config;
mod db;
mod error;
mod file_store;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::active_store::{ActiveStore, MemoryActiveStore};
use crate::api::AppState;
use crate::archive::ArchivalSyncer;
use crate::config::ServerConfig;
use crate::db::Db;
use crate::file_store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (RUST_LOG overrides)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hearth_server=debug")),
        )
        .init();

    info!("Starting Hearth server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        files = %config.file_storage_path.display(),
        admin_enabled = config.admin_token.is_some(),
        archive_interval_secs = config.archive_interval_secs,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Subsystems
    // -----------------------------------------------------------------------
    let db = Db::open(config.database_path.clone()).await?;
    let files =
        Arc::new(FileStore::new(config.file_storage_path.clone(), config.max_upload_size).await?);
    let active: Arc<dyn ActiveStore> = Arc::new(MemoryActiveStore::new());
    let archive = Arc::new(ArchivalSyncer::new(
        active.clone(),
        db.clone(),
        config.archive_batch_size,
    ));

    let app_state = AppState {
        db,
        files,
        active,
        archive: archive.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------

    if config.archive_interval_secs > 0 {
        let every = Duration::from_secs(config.archive_interval_secs);
        info!(every_secs = config.archive_interval_secs, "Periodic archiving enabled");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                archive.sync_all().await;
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. HTTP API (runs until Ctrl+C)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
