// ABOUTME: Gateway binary: phased startup, fleet wiring, cooperative shutdown
// ABOUTME: Each startup phase fails with its own exit code

use dotenv::dotenv;
use fleet_ring::{HttpDiscovery, Monitor, NodeRecord, Rehasher, DEFAULT_POLL_INTERVAL};
use gatecast_core::registry::{DeviceRegistry, LocalRegistry};
use gatecast_core::GatewayConfig;
use gatecast_outbound::DispatchRouter;
use gatecast_service::{serve_control, serve_devices, ServiceState};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Exit codes by startup phase, so a crash loop points at the failing phase
// without reading logs.
const EXIT_ENVIRONMENT: i32 = 1;
const EXIT_OUTBOUND: i32 = 2;
const EXIT_CONTROL: i32 = 3;
const EXIT_DEVICE: i32 = 4;
const EXIT_DISCOVERY: i32 = 5;
const EXIT_MONITOR: i32 = 6;

const DEFAULT_DEVICE_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:9090";
const DEFAULT_DRAIN_MS: u64 = 5_000;

fn main() {
    dotenv().ok();

    let worker_threads = env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| num_cpus::get().max(4) * 2);

    println!("\n================================================");
    println!("⛩  Gatecast Gateway Starting...");
    println!("   Tokio worker threads: {}", worker_threads);
    println!("================================================\n");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ failed to build async runtime: {}", e);
            std::process::exit(EXIT_ENVIRONMENT);
        }
    };

    let code = runtime.block_on(run());
    std::process::exit(code);
}

async fn run() -> i32 {
    // Phase 1: environment.
    if let Err(problems) = validate_environment() {
        eprintln!("❌ Configuration Error\n\n{}\n", problems);
        return EXIT_ENVIRONMENT;
    }

    init_tracing();

    let node_id = env::var("GATECAST_NODE_ID")
        .unwrap_or_else(|_| format!("gatecast-{}", uuid::Uuid::new_v4()));
    tracing::info!(node_id = %node_id, "✔︎ environment validated");

    let cancel = CancellationToken::new();

    // Phase 2: outbound config, dispatch router, device registry.
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load gateway config: {}", e);
            return EXIT_OUTBOUND;
        }
    };

    let router = match DispatchRouter::build(&config.outbound, &cancel) {
        Ok(router) => router,
        Err(e) => {
            tracing::error!("failed to build dispatch router: {}", e);
            return EXIT_OUTBOUND;
        }
    };

    let registry = Arc::new(LocalRegistry::new());
    let state = Arc::new(ServiceState::new(
        node_id.clone(),
        registry.clone(),
        router.sender(),
    ));
    tracing::info!(kinds = ?state.outbound.bound_kinds(), "✔︎ dispatch router ready");

    // Phase 3: control server.
    let control_addr =
        env::var("CONTROL_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_CONTROL_ADDR.to_string());
    let control_listener = match tokio::net::TcpListener::bind(&control_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %control_addr, "failed to bind control server: {}", e);
            return EXIT_CONTROL;
        }
    };
    let control_task = tokio::spawn(serve_control(
        control_listener,
        state.clone(),
        cancel.clone(),
    ));
    tracing::info!(addr = %control_addr, "✔︎ control server listening");

    // Phase 4: device service.
    let device_addr =
        env::var("DEVICE_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_DEVICE_ADDR.to_string());
    let device_listener = match tokio::net::TcpListener::bind(&device_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %device_addr, "failed to bind device service: {}", e);
            return EXIT_DEVICE;
        }
    };
    let device_task = tokio::spawn(serve_devices(device_listener, state.clone(), cancel.clone()));
    tracing::info!(addr = %device_addr, "✔︎ device service listening");

    // Phases 5 and 6 only apply with discovery configured; without it the
    // node runs standalone and keeps every connection it accepts.
    let mut fleet = None;
    match env::var("DISCOVERY_URL") {
        Ok(discovery_url) if !discovery_url.is_empty() => {
            // Phase 5: discovery registration. This comes after the device
            // service is up, so peers never learn an address that is not
            // serving yet.
            let advertise =
                env::var("GATECAST_ADVERTISE_ADDR").unwrap_or_else(|_| device_addr.clone());
            let record = NodeRecord {
                node_id: node_id.clone(),
                device_addr: advertise,
            };
            let discovery = match HttpDiscovery::new(&discovery_url, record) {
                Ok(discovery) => Arc::new(discovery),
                Err(e) => {
                    tracing::error!("failed to build discovery client: {}", e);
                    return EXIT_DISCOVERY;
                }
            };
            if let Err(e) = discovery.register().await {
                tracing::error!(url = %discovery_url, "discovery registration failed: {}", e);
                return EXIT_DISCOVERY;
            }
            tracing::info!(url = %discovery_url, "✔︎ registered with discovery");

            // Phase 6: membership monitor and rehasher.
            let poll_interval = match env::var("DISCOVERY_POLL_SECS") {
                Ok(value) => match value.parse::<u64>() {
                    Ok(secs) if secs > 0 => Duration::from_secs(secs),
                    _ => {
                        tracing::error!("DISCOVERY_POLL_SECS must be a positive integer");
                        return EXIT_MONITOR;
                    }
                },
                Err(_) => DEFAULT_POLL_INTERVAL,
            };

            // Prime the membership view. A discovery that accepts
            // registrations but cannot list nodes is a broken deployment,
            // and better caught now than on the first poll.
            if let Err(e) = discovery.fetch_nodes().await {
                tracing::error!("initial membership fetch failed: {}", e);
                return EXIT_MONITOR;
            }

            let monitor = Monitor::spawn(discovery.clone(), poll_interval, cancel.clone());
            let registry_dyn: Arc<dyn DeviceRegistry> = registry.clone();
            let rehasher = Rehasher::spawn(
                node_id.clone(),
                registry_dyn,
                monitor.subscribe(),
                cancel.clone(),
            );
            state.set_rehash(rehasher.handle());
            tracing::info!(poll_secs = poll_interval.as_secs(), "✔︎ fleet monitor and rehasher running");

            fleet = Some((discovery, monitor, rehasher));
        }
        _ => {
            tracing::info!("no service discovery configured, running standalone");
        }
    }

    tracing::info!(node_id = %node_id, "✨ gatecast running");

    wait_for_shutdown_signal().await;

    // Stop intake first: cancelling closes device connections and halts the
    // monitor and rehasher before anything is torn down underneath them.
    tracing::info!("shutting down...");
    cancel.cancel();

    if let Some((discovery, monitor, rehasher)) = fleet {
        rehasher.shutdown().await;
        monitor.shutdown().await;
        if let Err(e) = discovery.deregister().await {
            tracing::warn!("discovery deregistration failed: {}", e);
        }
    }

    for (name, task) in [("device service", device_task), ("control server", control_task)] {
        match tokio::time::timeout(Duration::from_secs(10), task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("{} exited with error: {}", name, e),
            Ok(Err(e)) => tracing::warn!("{} task panicked: {}", name, e),
            Err(_) => tracing::warn!("{} did not stop in time", name),
        }
    }

    // Both servers are down, so this is the last live dispatch sender; drop
    // it and drain whatever the pipelines still hold.
    drop(state);
    let drain_ms = env::var("SHUTDOWN_DRAIN_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_DRAIN_MS);
    router.shutdown(Duration::from_millis(drain_ms)).await;

    tracing::info!("shutdown complete");
    0
}

/// Check everything the process needs from the environment, reporting all
/// problems at once instead of one per restart.
fn validate_environment() -> Result<(), String> {
    let mut problems = Vec::new();

    for var in ["DEVICE_LISTEN_ADDR", "CONTROL_LISTEN_ADDR"] {
        if let Ok(addr) = env::var(var) {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                problems.push(format!(
                    "{} must be a socket address like {}",
                    var, DEFAULT_DEVICE_ADDR
                ));
            }
        }
    }

    if let Ok(url) = env::var("DISCOVERY_URL") {
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            problems.push("DISCOVERY_URL must be an http(s) URL".to_string());
        }
    }

    if let Ok(value) = env::var("SHUTDOWN_DRAIN_MS") {
        if value.parse::<u64>().is_err() {
            problems.push("SHUTDOWN_DRAIN_MS must be an integer".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!("  - {}", problems.join("\n  - ")))
    }
}

fn init_tracing() {
    let is_production = env::var("NODE_ENV").unwrap_or_default() == "production";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
