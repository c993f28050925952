//! Online/offline detection.
//!
//! A single [`ConnectivityObserver`] owns the raw signal and fans committed
//! transitions out to every consumer (sync engine, upload queue, UI) through a
//! broadcast channel.  Raw reports go through one debounce task: a transition
//! is committed only when the raw value has been stable for the debounce
//! window, so a flap shorter than the window emits nothing.
//!
//! The raw signal in this crate comes from [`HealthCheck`], which polls the
//! server's `/health` route.  Until the first committed report the observer
//! says "online".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A committed connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

pub struct ConnectivityObserver {
    raw_tx: watch::Sender<bool>,
    online: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityObserver {
    /// Create the observer and spawn its debounce task on the current tokio
    /// runtime.  The task ends when the observer is dropped.
    pub fn spawn(debounce: Duration) -> Arc<Self> {
        let (raw_tx, raw_rx) = watch::channel(true);
        let (events, _) = broadcast::channel(32);
        let online = Arc::new(AtomicBool::new(true));

        tokio::spawn(debounce_loop(
            raw_rx,
            debounce,
            online.clone(),
            events.clone(),
        ));

        Arc::new(Self {
            raw_tx,
            online,
            events,
        })
    }

    /// Feed a raw observation.  Repeating the current raw value is a no-op.
    pub fn report(&self, online: bool) {
        self.raw_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Committed status.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

async fn debounce_loop(
    mut raw_rx: watch::Receiver<bool>,
    window: Duration,
    online: Arc<AtomicBool>,
    events: broadcast::Sender<ConnectivityEvent>,
) {
    while raw_rx.changed().await.is_ok() {
        // Wait for the raw value to hold still for a full window.
        let candidate = loop {
            let value = *raw_rx.borrow_and_update();
            match tokio::time::timeout(window, raw_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return,
                Err(_) => break value,
            }
        };

        if online.swap(candidate, Ordering::AcqRel) == candidate {
            debug!(online = candidate, "Connectivity flap settled on current status");
            continue;
        }

        let event = if candidate {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        info!(?event, "Connectivity changed");
        // No subscribers is fine.
        let _ = events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Polls `GET {server}/health` and reports the outcome to an observer.
pub struct HealthCheck {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl HealthCheck {
    pub fn new(client: reqwest::Client, server_url: &str, interval: Duration) -> Self {
        Self {
            client,
            url: format!("{}/health", server_url.trim_end_matches('/')),
            interval,
        }
    }

    /// One check: any 2xx within the client's timeout counts as online.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Run the check loop until `shutdown` flips to `true`.
    pub fn spawn(
        self,
        observer: Arc<ConnectivityObserver>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let up = self.check().await;
                        observer.report(up);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Health check stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(40);

    async fn settle() {
        tokio::time::sleep(WINDOW * 4).await;
    }

    #[tokio::test]
    async fn defaults_to_online() {
        let observer = ConnectivityObserver::spawn(WINDOW);
        assert!(observer.is_online());
    }

    #[tokio::test]
    async fn sustained_change_is_committed_and_broadcast() {
        let observer = ConnectivityObserver::spawn(WINDOW);
        let mut events = observer.subscribe();

        observer.report(false);
        settle().await;
        assert!(!observer.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Offline);

        observer.report(true);
        settle().await;
        assert!(observer.is_online());
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::Online);
    }

    #[tokio::test]
    async fn short_flap_emits_nothing() {
        let observer = ConnectivityObserver::spawn(WINDOW);
        let mut events = observer.subscribe();

        observer.report(false);
        tokio::time::sleep(WINDOW / 4).await;
        observer.report(true);
        settle().await;

        assert!(observer.is_online());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn check_against_unreachable_server_reports_offline() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let checker = HealthCheck::new(client, "http://127.0.0.1:9/", Duration::from_secs(1));
        assert_eq!(checker.url, "http://127.0.0.1:9/health");
        assert!(!checker.check().await);
    }
}
