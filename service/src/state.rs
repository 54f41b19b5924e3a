use fleet_ring::RehashHandle;
use gatecast_core::registry::LocalRegistry;
use gatecast_outbound::DispatchSender;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Shared state behind both HTTP routers.
pub struct ServiceState {
    pub node_id: String,
    pub registry: Arc<LocalRegistry>,
    pub outbound: DispatchSender,
    /// Set once the rehasher starts. Stays empty when the node runs without
    /// service discovery.
    rehash: OnceCell<RehashHandle>,
}

impl ServiceState {
    pub fn new(node_id: String, registry: Arc<LocalRegistry>, outbound: DispatchSender) -> Self {
        Self {
            node_id,
            registry,
            outbound,
            rehash: OnceCell::new(),
        }
    }

    /// Install the rehash handle. A second call is ignored; there is only
    /// ever one rehasher per process.
    pub fn set_rehash(&self, handle: RehashHandle) {
        let _ = self.rehash.set(handle);
    }

    pub fn rehash(&self) -> Option<&RehashHandle> {
        self.rehash.get()
    }
}
