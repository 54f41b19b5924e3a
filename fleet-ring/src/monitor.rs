use crate::error::FleetResult;
use crate::ring::{MembershipSnapshot, NodeId};
use gatecast_core::metrics::METRICS;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Source of fleet membership, normally the discovery service.
#[async_trait::async_trait]
pub trait MembershipSource: Send + Sync + 'static {
    /// Fetch the current live node list.
    async fn fetch(&self) -> FleetResult<Vec<NodeId>>;

    /// Refresh this node's own liveness record. Default: nothing to do.
    async fn heartbeat(&self) -> FleetResult<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: MembershipSource + ?Sized> MembershipSource for std::sync::Arc<S> {
    async fn fetch(&self) -> FleetResult<Vec<NodeId>> {
        (**self).fetch().await
    }

    async fn heartbeat(&self) -> FleetResult<()> {
        (**self).heartbeat().await
    }
}

/// Polls a membership source and publishes deduplicated snapshots.
///
/// Snapshots go out on a watch channel: consumers only ever observe the
/// newest one, and identical consecutive fetches publish nothing. A fetch
/// failure keeps the last good snapshot in place; the fleet view goes stale
/// rather than empty.
pub struct Monitor {
    rx: watch::Receiver<MembershipSnapshot>,
    task: JoinHandle<()>,
}

impl Monitor {
    /// Spawn the poll loop. The published snapshot stays empty until the
    /// first successful fetch.
    pub fn spawn<S: MembershipSource>(
        source: S,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(MembershipSnapshot::default());
        let task = tokio::spawn(poll_loop(source, poll_interval, tx, cancel));
        Self { rx, task }
    }

    /// A receiver for membership snapshots. Latest value wins.
    pub fn subscribe(&self) -> watch::Receiver<MembershipSnapshot> {
        self.rx.clone()
    }

    /// Reap the poll task. The loop itself exits via the cancellation token.
    pub async fn shutdown(self) {
        let _ = self.task.await;
    }
}

async fn poll_loop<S: MembershipSource>(
    source: S,
    poll_interval: Duration,
    tx: watch::Sender<MembershipSnapshot>,
    cancel: CancellationToken,
) {
    let mut consecutive_failures: u32 = 0;
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("membership monitor shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        // Re-registering on every poll doubles as the liveness heartbeat.
        if let Err(e) = source.heartbeat().await {
            tracing::warn!("discovery heartbeat failed: {}", e);
        }

        match source.fetch().await {
            Ok(nodes) => {
                consecutive_failures = 0;
                let snapshot = MembershipSnapshot::new(nodes);

                let changed = *tx.borrow() != snapshot;
                if changed {
                    METRICS.inc_membership_changes();
                    tracing::info!(members = snapshot.len(), "fleet membership changed");
                    if tx.send(snapshot).is_err() {
                        tracing::debug!("no membership subscribers left, monitor exiting");
                        break;
                    }
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                METRICS.inc_discovery_errors();
                let backoff_ms = 100 * 2u64.pow(consecutive_failures.min(6));
                tracing::error!(
                    failures = consecutive_failures,
                    backoff_ms,
                    "membership fetch failed, serving stale membership: {}",
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                }
            }
        }
    }
}
