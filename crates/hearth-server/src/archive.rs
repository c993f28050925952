//! Moves messages from the active-session store into the server database.
//!
//! Each session keeps a [`Watermark`] so a call only reads entries it has not
//! archived yet.  Inserts are keyed by message id, which makes a repeated or
//! overlapping run harmless.  Calls for the same session are serialized by a
//! per-session lock; different sessions proceed in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_shared::constants::ARCHIVE_SCAN_COUNT;
use hearth_shared::protocol::{ActiveMessage, GlobalSyncResult, RemoteMessage, SyncResult};
use hearth_shared::HearthError;

use crate::active_store::{
    message_key, session_id_from_key, session_index_key, ActiveStore, SESSION_INDEX_PATTERN,
};
use crate::db::{Db, Watermark};
use crate::error::ServerError;

pub struct ArchivalSyncer {
    active: Arc<dyn ActiveStore>,
    db: Db,
    batch_size: usize,
    leases: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ArchivalSyncer {
    pub fn new(active: Arc<dyn ActiveStore>, db: Db, batch_size: usize) -> Self {
        Self {
            active,
            db,
            batch_size: batch_size.max(1),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Archive the next batch of one session.
    pub async fn sync_session(&self, session_id: Uuid) -> SyncResult {
        let lease = self.lease(session_id);
        let outcome = {
            let _guard = lease.lock().await;
            self.archive_next_batch(session_id).await
        };
        self.release(session_id, lease);

        match outcome {
            Ok(inserted) => SyncResult::ok(inserted),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Session archive failed");
                SyncResult::failed(e.to_string())
            }
        }
    }

    /// Archive every session found in the active store.  Every session gets
    /// an entry in the summary; invalid ids and failing sessions are recorded
    /// as failed and the scan carries on.
    pub async fn sync_all(&self) -> GlobalSyncResult {
        let mut summary = GlobalSyncResult::default();
        let mut seen = HashSet::new();
        let mut cursor = 0u64;

        loop {
            let (next, keys) = match self
                .active
                .scan(cursor, SESSION_INDEX_PATTERN, ARCHIVE_SCAN_COUNT)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(cursor, error = %e, "Session scan failed");
                    summary.record_failure(SESSION_INDEX_PATTERN, e.to_string());
                    break;
                }
            };

            let mut valid = Vec::new();
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let raw = session_id_from_key(&key).unwrap_or(&key);
                match Uuid::parse_str(raw) {
                    Ok(id) => valid.push(id),
                    Err(_) => {
                        warn!(key = %key, "Skipping session with invalid id");
                        summary.record(
                            raw,
                            SyncResult::failed(
                                HearthError::InvalidSessionId(raw.to_string()).to_string(),
                            ),
                        );
                    }
                }
            }

            let results = join_all(valid.iter().map(|id| self.sync_session(*id))).await;
            for (id, result) in valid.iter().zip(results) {
                summary.record(id.to_string(), result);
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!(
            sessions = summary.sessions_processed,
            messages = summary.total_messages_synced,
            failed = summary.failed_sessions_count,
            "Archive pass finished"
        );
        summary
    }

    async fn archive_next_batch(&self, session_id: Uuid) -> Result<u64, ServerError> {
        let mark = self.db.watermark(session_id).await?;
        let index = session_index_key(&session_id.to_string());
        let entries = self
            .active
            .range_by_score(
                &index,
                mark.timestamp_ms,
                mark.seen_at_timestamp as usize,
                self.batch_size,
            )
            .await?;

        let Some(&(_, last_score)) = entries.last() else {
            return Ok(0);
        };
        let at_last = entries.iter().filter(|(_, s)| *s == last_score).count() as u64;
        let next_mark = Watermark {
            timestamp_ms: last_score,
            seen_at_timestamp: if last_score == mark.timestamp_ms {
                mark.seen_at_timestamp + at_last
            } else {
                at_last
            },
        };

        let records = join_all(
            entries
                .iter()
                .map(|(member, _)| self.load_message(session_id, member)),
        )
        .await;
        let rows: Vec<RemoteMessage> = records.into_iter().flatten().collect();

        let inserted = self.db.archive_batch(session_id, rows, next_mark).await?;
        debug!(
            session = %session_id,
            read = entries.len(),
            inserted,
            watermark = next_mark.timestamp_ms,
            "Archived batch"
        );
        Ok(inserted)
    }

    /// Fetch and decode one record.  Missing or malformed records are
    /// logged and skipped.
    async fn load_message(&self, session_id: Uuid, member: &str) -> Option<RemoteMessage> {
        let raw = match self.active.get(&message_key(member)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(session = %session_id, message = %member, "Indexed message has no record");
                return None;
            }
            Err(e) => {
                warn!(session = %session_id, message = %member, error = %e, "Failed to read message");
                return None;
            }
        };

        match serde_json::from_str::<ActiveMessage>(&raw) {
            Ok(m) => Some(RemoteMessage {
                id: m.id,
                chat_id: session_id,
                role: m.role,
                content: m.content,
                created_at: m.created_at,
            }),
            Err(e) => {
                warn!(session = %session_id, message = %member, error = %e, "Malformed message record");
                None
            }
        }
    }

    fn lease(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        match self.leases.lock() {
            Ok(mut leases) => leases.entry(session_id).or_default().clone(),
            // A poisoned map only loses sharing; the caller still gets a lock.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release(&self, session_id: Uuid, lease: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut leases) = self.leases.lock() {
            // Map entry plus ours: nobody else is waiting.
            if Arc::strong_count(&lease) == 2 {
                leases.remove(&session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use hearth_shared::types::Role;

    use crate::active_store::{submit_message, MemoryActiveStore};

    fn msg(session_id: Uuid, ts: i64, content: &str) -> ActiveMessage {
        ActiveMessage {
            id: Uuid::new_v4(),
            session_id,
            role: Role::User,
            content: content.into(),
            created_at: DateTime::<Utc>::from_timestamp_millis(ts).unwrap(),
        }
    }

    fn syncer(active: Arc<MemoryActiveStore>, batch: usize) -> (ArchivalSyncer, Db) {
        let db = Db::open_in_memory().unwrap();
        (ArchivalSyncer::new(active, db.clone(), batch), db)
    }

    #[tokio::test]
    async fn second_run_archives_nothing() {
        let active = Arc::new(MemoryActiveStore::new());
        let session = Uuid::new_v4();
        for (i, ts) in [1_000, 2_000, 3_000].iter().enumerate() {
            submit_message(active.as_ref(), &msg(session, *ts, &format!("m{i}")))
                .await
                .unwrap();
        }
        let (syncer, db) = syncer(active, 100);

        let first = syncer.sync_session(session).await;
        assert!(first.success);
        assert_eq!(first.messages_synced, 3);
        let mark = db.watermark(session).await.unwrap();
        assert_eq!(mark.timestamp_ms, 3_000);

        let second = syncer.sync_session(session).await;
        assert_eq!(second, SyncResult::ok(0));
        assert_eq!(db.watermark(session).await.unwrap(), mark);
        assert_eq!(db.messages_for(session).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn entries_sharing_a_timestamp_are_not_lost_between_batches() {
        let active = Arc::new(MemoryActiveStore::new());
        let session = Uuid::new_v4();
        for i in 0..5 {
            submit_message(active.as_ref(), &msg(session, 5_000, &format!("tie{i}")))
                .await
                .unwrap();
        }
        submit_message(active.as_ref(), &msg(session, 6_000, "later"))
            .await
            .unwrap();
        let (syncer, db) = syncer(active, 2);

        let mut total = 0;
        for _ in 0..5 {
            total += syncer.sync_session(session).await.messages_synced;
        }
        assert_eq!(total, 6);
        assert_eq!(db.messages_for(session).await.unwrap().len(), 6);
        assert_eq!(
            db.watermark(session).await.unwrap(),
            Watermark {
                timestamp_ms: 6_000,
                seen_at_timestamp: 1
            }
        );
    }

    #[tokio::test]
    async fn malformed_and_missing_records_are_skipped() {
        let active = Arc::new(MemoryActiveStore::new());
        let session = Uuid::new_v4();
        submit_message(active.as_ref(), &msg(session, 1_000, "good"))
            .await
            .unwrap();
        let index = session_index_key(&session.to_string());
        active.zadd(&index, 2_000, "ghost").await.unwrap();
        active.zadd(&index, 3_000, "broken").await.unwrap();
        active.set(&message_key("broken"), "{not json").await.unwrap();
        let (syncer, db) = syncer(active, 100);

        let result = syncer.sync_session(session).await;
        assert_eq!(result, SyncResult::ok(1));
        assert_eq!(db.watermark(session).await.unwrap().timestamp_ms, 3_000);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_session_do_not_double_count() {
        let active = Arc::new(MemoryActiveStore::new());
        let session = Uuid::new_v4();
        for ts in 1..=10 {
            submit_message(active.as_ref(), &msg(session, ts * 100, "x"))
                .await
                .unwrap();
        }
        let (syncer, db) = syncer(active, 100);

        let (a, b) = tokio::join!(syncer.sync_session(session), syncer.sync_session(session));
        assert_eq!(a.messages_synced + b.messages_synced, 10);
        assert_eq!(db.messages_for(session).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn sync_all_records_invalid_session_ids() {
        let active = Arc::new(MemoryActiveStore::new());
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        submit_message(active.as_ref(), &msg(s1, 1_000, "a")).await.unwrap();
        submit_message(active.as_ref(), &msg(s1, 2_000, "b")).await.unwrap();
        submit_message(active.as_ref(), &msg(s2, 1_500, "c")).await.unwrap();
        active
            .zadd(&session_index_key("not-a-uuid"), 1_000, "orphan")
            .await
            .unwrap();
        let (syncer, _db) = syncer(active, 100);

        let summary = syncer.sync_all().await;
        assert_eq!(summary.sessions_processed, 3);
        assert_eq!(summary.total_messages_synced, 3);
        assert_eq!(summary.failed_sessions_count, 1);
        assert_eq!(summary.failed_sessions[0].session_id, "not-a-uuid");

        assert_eq!(summary.sessions.len(), 3);
        let outcome = |id: &str| {
            summary
                .sessions
                .iter()
                .find(|s| s.session_id == id)
                .map(|s| s.result.clone())
                .unwrap()
        };
        assert_eq!(outcome(&s1.to_string()), SyncResult::ok(2));
        assert_eq!(outcome(&s2.to_string()), SyncResult::ok(1));
        let invalid = outcome("not-a-uuid");
        assert!(!invalid.success);
        assert!(invalid.error.unwrap().contains("not-a-uuid"));

        let again = syncer.sync_all().await;
        assert_eq!(again.total_messages_synced, 0);
    }
}
