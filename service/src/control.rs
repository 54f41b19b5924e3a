use crate::state::ServiceState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use gatecast_core::metrics::METRICS;
use gatecast_core::registry::{DeviceRegistry, DisconnectOutcome};
use gatecast_core::DeviceId;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Build the operator-facing control router.
pub fn control_router(state: Arc<ServiceState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/devices", get(list_devices))
        .route("/devices/:id", delete(force_disconnect))
        .route("/fleet", get(fleet_status))
        .with_state(state)
        .layer(cors)
}

/// Bind-and-serve wrapper used by the binary and the test harness.
pub async fn serve_control(
    listener: tokio::net::TcpListener,
    state: Arc<ServiceState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = control_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn healthz(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "nodeId": state.node_id,
        "devices": state.registry.device_count(),
        "queued": state.outbound.queued(),
    }))
}

async fn metrics(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    // The connection gauge is refreshed lazily, at scrape time.
    METRICS.set_device_connections(state.registry.device_count() as u64);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        METRICS.to_prometheus(),
    )
}

async fn list_devices(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let mut devices: Vec<String> = state
        .registry
        .devices()
        .iter()
        .map(|d| d.to_string())
        .collect();
    devices.sort();

    Json(json!({
        "count": devices.len(),
        "devices": devices,
    }))
}

async fn force_disconnect(
    Path(id): Path<String>,
    State(state): State<Arc<ServiceState>>,
) -> impl IntoResponse {
    let device = DeviceId::new(id);
    match state.registry.force_disconnect(&device, "disconnected by operator") {
        DisconnectOutcome::Disconnected => {
            tracing::info!(device = %device, "operator disconnected device");
            (
                StatusCode::OK,
                Json(json!({ "device": device.to_string(), "outcome": "disconnected" })),
            )
        }
        DisconnectOutcome::AlreadyGone => (
            StatusCode::NOT_FOUND,
            Json(json!({ "device": device.to_string(), "outcome": "not-connected" })),
        ),
    }
}

async fn fleet_status(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let (coordinated, members) = match state.rehash() {
        Some(handle) => (true, handle.member_count()),
        None => (false, 0),
    };

    let bound: Vec<String> = state
        .outbound
        .bound_kinds()
        .iter()
        .map(|k| k.to_string())
        .collect();

    Json(json!({
        "nodeId": state.node_id,
        "discovery": coordinated,
        "fleetMembers": members,
        "boundKinds": bound,
    }))
}
