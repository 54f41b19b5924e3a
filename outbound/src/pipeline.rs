// ABOUTME: One delivery pipeline: a device-sharded bounded queue in front of
// ABOUTME: HTTP delivery workers with retry, jittered backoff, and shed-on-full

use crate::error::{OutboundError, SubmitError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use gatecast_core::metrics::METRICS;
use gatecast_core::{
    DeliveryConfig, DeliveryEnvelope, DeviceId, EventKind, LifecycleEvent, SelectionPolicy,
};
use siphasher::sip::SipHasher24;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cheap, cloneable submission handle for one pipeline.
///
/// Events for the same device always land on the same queue shard, so
/// per-device order survives the worker pool. Submission never blocks.
#[derive(Clone)]
pub struct PipelineSender {
    kind: EventKind,
    shards: Arc<Vec<Sender<LifecycleEvent>>>,
}

impl PipelineSender {
    /// Hand an event to the pipeline.
    pub fn submit(&self, event: LifecycleEvent) -> Result<(), SubmitError> {
        let shard = &self.shards[shard_index(&event.device, self.shards.len())];
        match shard.try_send(event) {
            Ok(()) => {
                METRICS.inc_outbound_submitted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SubmitError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Closed),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Events queued across all shards. Approximate while workers are moving.
    pub fn queued(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }
}

/// A running delivery pipeline for one event kind.
///
/// Owns the worker tasks; hand out [`PipelineSender`]s for submission. The
/// queues close once every sender is dropped, which is what lets workers
/// drain and exit at shutdown.
pub struct Pipeline {
    kind: EventKind,
    sender: PipelineSender,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the worker pool for `kind` and return the running pipeline.
    pub fn start(
        kind: EventKind,
        config: DeliveryConfig,
        cancel: CancellationToken,
    ) -> Result<Self, OutboundError> {
        let worker_count = config.workers.max(1);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        if config.destinations.is_empty() {
            tracing::warn!(kind = %kind, "pipeline has no destinations, events will be consumed without delivery");
        }

        let config = Arc::new(config);
        let rotation = Arc::new(AtomicUsize::new(0));

        let mut shards = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (tx, rx) = bounded::<LifecycleEvent>(config.queue_capacity);
            shards.push(tx);
            workers.push(tokio::spawn(delivery_worker(
                kind,
                worker_id,
                rx,
                client.clone(),
                config.clone(),
                rotation.clone(),
                cancel.clone(),
            )));
        }

        tracing::info!(
            kind = %kind,
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            destinations = config.destinations.len(),
            policy = %config.policy,
            "delivery pipeline started"
        );

        Ok(Self {
            kind,
            sender: PipelineSender {
                kind,
                shards: Arc::new(shards),
            },
            workers,
        })
    }

    pub fn sender(&self) -> PipelineSender {
        self.sender.clone()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Close this pipeline's own sender and wait for workers to drain what is
    /// already queued, up to `drain`. For a clean drain every outstanding
    /// [`PipelineSender`] clone must be dropped first; otherwise the queues
    /// stay open and the workers are aborted at the deadline.
    pub async fn shutdown(self, drain: Duration) {
        let deadline = tokio::time::Instant::now() + drain;
        self.shutdown_until(deadline).await;
    }

    pub(crate) async fn shutdown_until(self, deadline: tokio::time::Instant) {
        let Pipeline {
            kind,
            sender,
            workers,
        } = self;
        drop(sender);

        for handle in workers {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!(kind = %kind, "delivery worker did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

fn shard_index(device: &DeviceId, shard_count: usize) -> usize {
    let mut hasher = SipHasher24::new();
    device.hash(&mut hasher);
    (hasher.finish() % shard_count as u64) as usize
}

async fn delivery_worker(
    kind: EventKind,
    worker_id: usize,
    rx: Receiver<LifecycleEvent>,
    client: reqwest::Client,
    config: Arc<DeliveryConfig>,
    rotation: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    tracing::debug!(kind = %kind, worker_id, "delivery worker started");

    loop {
        // Blocking recv on a dedicated thread so the async runtime stays free.
        let rx_clone = rx.clone();
        let event = match tokio::task::spawn_blocking(move || rx_clone.recv()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => {
                tracing::debug!(kind = %kind, worker_id, "queue closed, delivery worker exiting");
                break;
            }
            Err(e) => {
                tracing::error!(kind = %kind, worker_id, "delivery worker recv failed: {}", e);
                continue;
            }
        };

        deliver_event(&client, &config, &rotation, &cancel, event).await;
    }
}

async fn deliver_event(
    client: &reqwest::Client,
    config: &DeliveryConfig,
    rotation: &AtomicUsize,
    cancel: &CancellationToken,
    event: LifecycleEvent,
) {
    if config.destinations.is_empty() {
        return;
    }

    let envelope = event.to_envelope();

    match config.policy {
        SelectionPolicy::FanOut => {
            for url in &config.destinations {
                deliver_to(client, config, cancel, url, &envelope).await;
            }
        }
        SelectionPolicy::RoundRobin => {
            let index = rotation.fetch_add(1, Ordering::Relaxed) % config.destinations.len();
            deliver_to(client, config, cancel, &config.destinations[index], &envelope).await;
        }
    }
}

/// POST the envelope to one destination, retrying up to the ceiling. Retries
/// stop early when the pipeline is cancelled so shutdown is not held hostage
/// by a dead destination.
async fn deliver_to(
    client: &reqwest::Client,
    config: &DeliveryConfig,
    cancel: &CancellationToken,
    url: &str,
    envelope: &DeliveryEnvelope,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.backoff_base_ms),
        Duration::from_millis(config.backoff_max_ms),
    );

    for attempt in 0..=config.retry_ceiling {
        match client.post(url).json(envelope).send().await {
            Ok(response) if response.status().is_success() => {
                METRICS.inc_outbound_delivered();
                return;
            }
            Ok(response) => {
                tracing::debug!(url, status = %response.status(), attempt, "delivery rejected");
            }
            Err(e) => {
                tracing::debug!(url, attempt, "delivery failed: {}", e);
            }
        }

        if attempt == config.retry_ceiling || cancel.is_cancelled() {
            break;
        }

        METRICS.inc_outbound_retries();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff.next_delay()) => {}
        }
    }

    METRICS.inc_outbound_dropped();
    tracing::warn!(
        url,
        event = %envelope.event,
        device = %envelope.device_id,
        "delivery abandoned"
    );
}

/// Exponential backoff with ±25% jitter so synchronized retries spread out.
struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self { current: base, max }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current.as_millis() as u64;

        let doubled = base.saturating_mul(2);
        self.current = Duration::from_millis(doubled).min(self.max);

        if base == 0 {
            return Duration::ZERO;
        }
        let spread = (base / 4).max(1);
        let offset = rand::random::<u64>() % (2 * spread + 1);
        Duration::from_millis(base - spread + offset)
    }
}
