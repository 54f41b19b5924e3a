use crate::device::DeviceId;
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Commands the gateway pushes to a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Close the connection. The reason surfaces in the disconnect event.
    Close { reason: String },
}

/// Depth of the per-connection command channel. Commands are rare; a full
/// buffer means the connection task has stopped draining and is on its way out.
pub const DEVICE_COMMAND_BUFFER: usize = 8;

/// Handle the registry keeps per connected device.
pub struct DeviceHandle {
    tx: mpsc::Sender<DeviceCommand>,
    pub connected_at: DateTime<Utc>,
}

impl DeviceHandle {
    pub fn new(tx: mpsc::Sender<DeviceCommand>) -> Self {
        Self {
            tx,
            connected_at: Utc::now(),
        }
    }

    /// Ask the connection task to close. Returns false when the command could
    /// not be queued, which only happens if the task already stopped draining.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.tx
            .try_send(DeviceCommand::Close {
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Outcome of a force-disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A close command was handed to the connection task.
    Disconnected,
    /// The device was not connected here. Callers treat this as success.
    AlreadyGone,
}

/// The seam between the transport layer and everything that reasons about
/// which devices this node currently holds.
pub trait DeviceRegistry: Send + Sync {
    /// Snapshot of the device ids held right now.
    fn devices(&self) -> Vec<DeviceId>;

    /// Ask the connection for `device` to close. Idempotent: a device that is
    /// already gone reports [`DisconnectOutcome::AlreadyGone`], never an error.
    fn force_disconnect(&self, device: &DeviceId, reason: &str) -> DisconnectOutcome;

    fn device_count(&self) -> usize;
}

/// In-process registry backed by a lock-free map.
pub struct LocalRegistry {
    devices: DashMap<DeviceId, Arc<DeviceHandle>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Insert a device. If the id is already present the previous connection
    /// is told to close and the new handle wins.
    pub fn add(&self, device: DeviceId, handle: Arc<DeviceHandle>) {
        if let Some(previous) = self.devices.insert(device.clone(), handle) {
            tracing::info!(device = %device, "duplicate device id, closing previous connection");
            previous.close("superseded by new connection");
        }
        METRICS.set_device_connections(self.devices.len() as u64);
    }

    /// Remove a device, but only if the stored handle is the caller's own.
    /// A connection that was superseded must not evict its replacement.
    pub fn remove(&self, device: &DeviceId, handle: &Arc<DeviceHandle>) {
        self.devices
            .remove_if(device, |_, stored| Arc::ptr_eq(stored, handle));
        METRICS.set_device_connections(self.devices.len() as u64);
    }

    pub fn connected_since(&self, device: &DeviceId) -> Option<DateTime<Utc>> {
        self.devices.get(device).map(|entry| entry.connected_at)
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for LocalRegistry {
    fn devices(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }

    fn force_disconnect(&self, device: &DeviceId, reason: &str) -> DisconnectOutcome {
        match self.devices.get(device) {
            Some(entry) => {
                // The close drains through the connection task, which removes
                // its own entry on the way out.
                if !entry.close(reason) {
                    tracing::warn!(device = %device, "close command not queued, connection task already stopping");
                }
                DisconnectOutcome::Disconnected
            }
            None => DisconnectOutcome::AlreadyGone,
        }
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }
}
