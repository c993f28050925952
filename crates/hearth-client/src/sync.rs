//! Background reconciliation between local storage and the server of record.
//!
//! A cycle runs `Idle -> Pushing -> Pulling -> Idle`:
//!
//! 1. **Push** sends pending deletions, then every dirty chat, message and
//!    document as an idempotent upsert keyed by the record id.  An acked
//!    record is marked synced unless it was saved again while its push was
//!    in flight; a failed one stays dirty for the next cycle.
//! 2. **Pull** fetches records changed since the stored checkpoint and merges
//!    them with the "local dirty wins" rule.  The checkpoint advances only
//!    after the whole batch has been applied.
//!
//! Only one cycle runs at a time.  A cycle requested while another is in
//! flight is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hearth_shared::protocol::{RemoteChat, RemoteDocument, RemoteMessage};
use hearth_shared::types::EntityKind;
use hearth_store::{MergeOutcome, Storage, SyncRecord};

use crate::connectivity::{ConnectivityEvent, ConnectivityObserver};
use crate::error::{ClientError, Result};
use crate::remote::RemoteApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records acknowledged by the server.
    pub pushed: usize,
    /// Records whose push failed and are still dirty.
    pub push_failures: usize,
    /// Remote deletions acknowledged (or already absent).
    pub deleted: usize,
    /// Pulled records written locally.
    pub pulled: usize,
    /// Pulled records discarded because the local copy is dirty.
    pub skipped_dirty: usize,
    /// Pulled records discarded because they were deleted locally.
    pub skipped_tombstoned: usize,
    pub pull_error: Option<String>,
}

pub struct SyncEngine {
    storage: Arc<Storage>,
    remote: Arc<dyn RemoteApi>,
    in_flight: AtomicBool,
    phase: watch::Sender<SyncPhase>,
}

/// Resets the in-flight flag and the phase when a cycle ends, including by
/// panic or cancellation.
struct CycleGuard<'a>(&'a SyncEngine);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.phase.send_replace(SyncPhase::Idle);
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(storage: Arc<Storage>, remote: Arc<dyn RemoteApi>) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            storage,
            remote,
            in_flight: AtomicBool::new(false),
            phase,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one push-then-pull cycle.  Returns `None` when another cycle is
    /// already in flight.
    pub async fn run_cycle(&self) -> Option<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in flight, dropping request");
            return None;
        }
        let _guard = CycleGuard(self);

        let mut report = SyncReport::default();

        self.phase.send_replace(SyncPhase::Pushing);
        self.push(&mut report).await;

        self.phase.send_replace(SyncPhase::Pulling);
        if let Err(e) = self.pull(&mut report).await {
            warn!(error = %e, "Pull phase aborted");
            report.pull_error = Some(e.to_string());
        }

        info!(
            pushed = report.pushed,
            push_failures = report.push_failures,
            deleted = report.deleted,
            pulled = report.pulled,
            skipped_dirty = report.skipped_dirty,
            "Sync cycle finished"
        );
        Some(report)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    async fn push(&self, report: &mut SyncReport) {
        for tombstone in self.storage.tombstones() {
            match self.remote.delete_remote(tombstone.kind, tombstone.id).await {
                Ok(()) | Err(ClientError::NotFound) => {
                    if let Err(e) = self.storage.clear_tombstone(tombstone.kind, tombstone.id) {
                        warn!(id = %tombstone.id, error = %e, "Failed to clear tombstone");
                    }
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(kind = %tombstone.kind, id = %tombstone.id, error = %e, "Remote delete failed");
                    report.push_failures += 1;
                }
            }
        }

        for kind in EntityKind::ALL {
            for pending in self.storage.list_dirty(kind) {
                let id = pending.record.id();
                let result = match &pending.record {
                    SyncRecord::Chat(c) => self.remote.push_chat(&RemoteChat::from(c)).await,
                    SyncRecord::Message(m) => {
                        self.remote.push_message(&RemoteMessage::from(m)).await
                    }
                    SyncRecord::Document(d) => {
                        self.remote.push_document(&RemoteDocument::from(d)).await
                    }
                };

                match result {
                    Ok(_) => match self.storage.mark_synced(kind, id, pending.version) {
                        Ok(acked) => {
                            if !acked {
                                debug!(%kind, %id, "Edited during push, stays dirty");
                            }
                            report.pushed += 1;
                        }
                        Err(e) => {
                            warn!(%kind, %id, error = %e, "Pushed but could not mark synced");
                            report.push_failures += 1;
                        }
                    },
                    Err(e) => {
                        warn!(%kind, %id, error = %e, "Push failed, record stays dirty");
                        report.push_failures += 1;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    async fn pull(&self, report: &mut SyncReport) -> Result<()> {
        let since = self.storage.pull_checkpoint();
        let batch = self.remote.pull_changes(since).await?;
        debug!(since, records = batch.len(), server_time = batch.server_time, "Pulled changes");

        let now = Utc::now();
        let records = batch
            .chats
            .into_iter()
            .map(|c| SyncRecord::Chat(c.into_record(now)))
            .chain(
                batch
                    .messages
                    .into_iter()
                    .map(|m| SyncRecord::Message(m.into_record(now))),
            )
            .chain(
                batch
                    .documents
                    .into_iter()
                    .map(|d| SyncRecord::Document(d.into_record(now))),
            );

        for record in records {
            match self.storage.merge_pulled(record)? {
                MergeOutcome::Applied => report.pulled += 1,
                MergeOutcome::KeptLocal => report.skipped_dirty += 1,
                MergeOutcome::Tombstoned => report.skipped_tombstoned += 1,
            }
        }

        if batch.server_time > since {
            self.storage.set_pull_checkpoint(batch.server_time)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Spawn the trigger loop: an interval tick while online, and an
    /// immediate cycle on every offline-to-online transition.
    pub fn spawn(
        self: Arc<Self>,
        connectivity: Arc<ConnectivityObserver>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut events = connectivity.subscribe();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if connectivity.is_online() {
                            self.run_cycle().await;
                        } else {
                            debug!("Offline, skipping interval sync");
                        }
                    }
                    event = events.recv() => match event {
                        Ok(ConnectivityEvent::Online) => {
                            self.run_cycle().await;
                        }
                        Ok(ConnectivityEvent::Offline) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Connectivity events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Sync loop stopped");
        })
    }
}
