use fleet_ring::error::FleetResult;
use fleet_ring::{MembershipSource, Monitor, Rehasher};
use gatecast_core::registry::{DeviceRegistry, LocalRegistry};
use gatecast_core::{DeliveryConfig, OutboundConfig};
use gatecast_outbound::DispatchRouter;
use gatecast_service::{serve_control, serve_devices, ServiceState};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fast membership poll so tests observe rehash passes without long waits.
const FLEET_POLL: Duration = Duration::from_millis(25);

/// Delivery settings tuned for tests: small queues, quick retries.
pub fn fast_delivery(destinations: Vec<String>) -> DeliveryConfig {
    DeliveryConfig {
        destinations,
        workers: 2,
        queue_capacity: 64,
        retry_ceiling: 1,
        request_timeout_ms: 2_000,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        ..DeliveryConfig::default()
    }
}

/// Poll until `predicate` holds. Panics if it never does.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A membership source tests steer directly.
pub struct ScriptedMembership {
    nodes: Mutex<Vec<String>>,
}

impl ScriptedMembership {
    pub fn new(nodes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(nodes.iter().map(|s| s.to_string()).collect()),
        })
    }

    pub fn set(&self, nodes: &[&str]) {
        *self.nodes.lock().unwrap() = nodes.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait::async_trait]
impl MembershipSource for ScriptedMembership {
    async fn fetch(&self) -> FleetResult<Vec<String>> {
        Ok(self.nodes.lock().unwrap().clone())
    }
}

/// An in-process gateway on ephemeral ports.
pub struct TestGateway {
    pub device_addr: SocketAddr,
    pub control_addr: SocketAddr,
    state: Arc<ServiceState>,
    router: DispatchRouter,
    cancel: CancellationToken,
    device_task: JoinHandle<std::io::Result<()>>,
    control_task: JoinHandle<std::io::Result<()>>,
    fleet: Option<(Monitor, Rehasher)>,
}

impl TestGateway {
    /// Boot a standalone gateway, no fleet coordination.
    pub async fn start(outbound: OutboundConfig) -> Self {
        Self::boot("qa-node", outbound, None).await
    }

    /// Boot a gateway wired to a membership source, polled fast.
    pub async fn start_with_fleet(
        node_id: &str,
        outbound: OutboundConfig,
        source: Arc<dyn MembershipSource>,
    ) -> Self {
        Self::boot(node_id, outbound, Some(source)).await
    }

    async fn boot(
        node_id: &str,
        outbound: OutboundConfig,
        source: Option<Arc<dyn MembershipSource>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let router =
            DispatchRouter::build(&outbound, &cancel).expect("dispatch router should build");

        let registry = Arc::new(LocalRegistry::new());
        let state = Arc::new(ServiceState::new(
            node_id.to_string(),
            registry.clone(),
            router.sender(),
        ));

        let control_listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("control listener should bind");
        let control_addr = control_listener.local_addr().unwrap();
        let control_task =
            tokio::spawn(serve_control(control_listener, state.clone(), cancel.clone()));

        let device_listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("device listener should bind");
        let device_addr = device_listener.local_addr().unwrap();
        let device_task =
            tokio::spawn(serve_devices(device_listener, state.clone(), cancel.clone()));

        let fleet = source.map(|source| {
            let monitor = Monitor::spawn(source, FLEET_POLL, cancel.clone());
            let registry_dyn: Arc<dyn DeviceRegistry> = registry.clone();
            let rehasher = Rehasher::spawn(
                node_id.to_string(),
                registry_dyn,
                monitor.subscribe(),
                cancel.clone(),
            );
            state.set_rehash(rehasher.handle());
            (monitor, rehasher)
        });

        Self {
            device_addr,
            control_addr,
            state,
            router,
            cancel,
            device_task,
            control_task,
            fleet,
        }
    }

    pub fn device_url(&self) -> String {
        format!("ws://{}/device", self.device_addr)
    }

    pub fn control_url(&self) -> String {
        format!("http://{}", self.control_addr)
    }

    /// Devices currently held by this gateway's registry.
    pub fn device_count(&self) -> usize {
        self.state.registry.device_count()
    }

    /// Tear everything down in dependency order: stop intake, reap the fleet
    /// tasks and servers, then drain the dispatch pipelines.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Some((monitor, rehasher)) = self.fleet {
            rehasher.shutdown().await;
            monitor.shutdown().await;
        }

        let _ = tokio::time::timeout(Duration::from_secs(5), self.device_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.control_task).await;

        // The state holds the last live dispatch sender; dropping it lets the
        // pipelines drain to empty.
        drop(self.state);
        self.router.shutdown(Duration::from_secs(2)).await;
    }
}
