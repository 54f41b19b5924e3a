use crate::ring::{MembershipSnapshot, NodeId, OwnershipRing};
use arc_swap::ArcSwap;
use gatecast_core::metrics::METRICS;
use gatecast_core::registry::{DeviceRegistry, DisconnectOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Disconnect reason attached when ownership moves to another node.
pub const REHASH_REASON: &str = "ownership moved";

/// Lock-free view of the newest published ownership ring.
///
/// `owns` answers from whatever ring the rehasher published last; readers
/// never wait for an in-progress rehash pass.
#[derive(Clone)]
pub struct RehashHandle {
    local: NodeId,
    ring: Arc<ArcSwap<OwnershipRing>>,
}

impl RehashHandle {
    /// Whether this node owns `key` under the newest ring. Before any ring is
    /// built, and under an empty ring, every key is kept locally, so the
    /// answer is true.
    pub fn owns(&self, key: &str) -> bool {
        self.ring
            .load()
            .owner_of(key)
            .map(|owner| owner == &self.local)
            .unwrap_or(true)
    }

    pub fn member_count(&self) -> usize {
        self.ring.load().member_count()
    }

    pub fn local_node(&self) -> &str {
        &self.local
    }
}

enum PassResult {
    Completed,
    Superseded,
}

/// Applies membership snapshots to the set of locally held devices.
///
/// A single task consumes snapshots, so rehash passes are serialized. When a
/// newer snapshot lands while a pass is still issuing disconnects, the pass
/// is abandoned and restarted against the newest ring; a single pass never
/// mixes decisions from two rings.
pub struct Rehasher {
    handle: RehashHandle,
    task: JoinHandle<()>,
}

impl Rehasher {
    pub fn spawn(
        local: NodeId,
        registry: Arc<dyn DeviceRegistry>,
        rx: watch::Receiver<MembershipSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        let ring = Arc::new(ArcSwap::from_pointee(OwnershipRing::default()));
        let handle = RehashHandle {
            local: local.clone(),
            ring: ring.clone(),
        };
        let task = tokio::spawn(rehash_loop(local, registry, rx, ring, cancel));
        Self { handle, task }
    }

    pub fn handle(&self) -> RehashHandle {
        self.handle.clone()
    }

    /// Reap the rehash task. The loop exits via the cancellation token.
    pub async fn shutdown(self) {
        let _ = self.task.await;
    }
}

async fn rehash_loop(
    local: NodeId,
    registry: Arc<dyn DeviceRegistry>,
    mut rx: watch::Receiver<MembershipSnapshot>,
    ring_slot: Arc<ArcSwap<OwnershipRing>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("rehasher shutting down");
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("membership channel closed, rehasher exiting");
                    break;
                }
            }
        }

        // Run until a pass completes against the newest snapshot.
        loop {
            let snapshot = rx.borrow_and_update().clone();
            match run_pass(&local, registry.as_ref(), &snapshot, &mut rx, &ring_slot) {
                PassResult::Completed => break,
                PassResult::Superseded => {
                    METRICS.inc_rehash_superseded();
                    tracing::info!("rehash superseded by newer membership snapshot, restarting");
                }
            }
        }
    }
}

fn run_pass(
    local: &str,
    registry: &dyn DeviceRegistry,
    snapshot: &MembershipSnapshot,
    rx: &mut watch::Receiver<MembershipSnapshot>,
    ring_slot: &ArcSwap<OwnershipRing>,
) -> PassResult {
    METRICS.inc_rehash_runs();

    let ring = OwnershipRing::build(snapshot);

    // Publish before sweeping, so owns() answers with the same ring this
    // pass is about to enforce.
    ring_slot.store(Arc::new(ring.clone()));
    METRICS.set_ring_members(ring.member_count() as u64);

    // Fail-safe: an empty view, or one that no longer lists this node, says
    // more about discovery than about the fleet. Keep every connection
    // rather than flush them all.
    if ring.is_empty() || !snapshot.contains(local) {
        tracing::warn!(
            members = snapshot.len(),
            "membership snapshot unusable for rehash, keeping all devices"
        );
        METRICS.set_rehash_kept(registry.device_count() as u64);
        return PassResult::Completed;
    }

    if snapshot.len() == 1 {
        // Only this node. Nothing can be foreign-owned.
        tracing::debug!("single-node fleet, nothing to rehash");
        METRICS.set_rehash_kept(registry.device_count() as u64);
        return PassResult::Completed;
    }

    let devices = registry.devices();
    let held = devices.len();
    let mut moved = 0usize;
    let mut kept = 0usize;

    for device in devices {
        if rx.has_changed().unwrap_or(false) {
            return PassResult::Superseded;
        }

        match ring.owner_of(device.as_str()) {
            Some(owner) if owner != local => {
                match registry.force_disconnect(&device, REHASH_REASON) {
                    DisconnectOutcome::Disconnected => {
                        METRICS.inc_rehash_disconnects();
                        tracing::debug!(device = %device, new_owner = %owner, "device no longer owned here, disconnecting");
                        moved += 1;
                    }
                    DisconnectOutcome::AlreadyGone => {
                        METRICS.inc_rehash_disconnects_noop();
                    }
                }
            }
            _ => kept += 1,
        }
    }

    METRICS.set_rehash_kept(kept as u64);
    tracing::info!(
        members = ring.member_count(),
        held,
        moved,
        kept,
        "rehash pass complete"
    );
    PassResult::Completed
}
