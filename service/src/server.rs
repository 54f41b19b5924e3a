// ABOUTME: Device-facing WebSocket service: one task per connection
// ABOUTME: Lifecycle events flow to the dispatch sender fire-and-forget

use crate::state::ServiceState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use gatecast_core::metrics::METRICS;
use gatecast_core::registry::{DeviceCommand, DeviceHandle, DEVICE_COMMAND_BUFFER};
use gatecast_core::{DeviceId, LifecycleEvent};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Header a device uses to identify itself on the upgrade request.
pub const DEVICE_ID_HEADER: &str = "x-gatecast-device-id";

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    /// Fallback identity for clients that cannot set headers.
    id: Option<String>,
}

/// Build the device-facing router.
pub fn device_router(state: Arc<ServiceState>, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/device", get(ws_upgrade))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state((state, cancel))
}

/// Bind-and-serve wrapper used by the binary and the test harness.
pub async fn serve_devices(
    listener: tokio::net::TcpListener,
    state: Arc<ServiceState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = device_router(state, cancel.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State((state, cancel)): State<(Arc<ServiceState>, CancellationToken)>,
) -> Response {
    let device_id = headers
        .get(DEVICE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or(query.id);

    let Some(device_id) = device_id.filter(|id| !id.is_empty()) else {
        tracing::debug!(peer = %peer, "rejecting device connection without an id");
        return (StatusCode::BAD_REQUEST, "missing device id").into_response();
    };

    let device = DeviceId::new(device_id);
    ws.on_upgrade(move |socket| handle_device(socket, device, peer, state, cancel))
}

async fn handle_device(
    socket: WebSocket,
    device: DeviceId,
    peer: SocketAddr,
    state: Arc<ServiceState>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel(DEVICE_COMMAND_BUFFER);

    let handle = Arc::new(DeviceHandle::new(cmd_tx));
    state.registry.add(device.clone(), handle.clone());

    METRICS.inc_devices_connected();
    tracing::info!(device = %device, peer = %peer, "device connected");

    if let Some(rehash) = state.rehash() {
        // Accept it anyway; if ownership really lies elsewhere the rehasher
        // will close it on the next pass.
        if !rehash.owns(device.as_str()) {
            tracing::debug!(device = %device, "device connected here but hashes to another node");
        }
    }

    state
        .outbound
        .route(LifecycleEvent::connect(device.clone(), Some(peer.to_string())));

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut close_reason = "connection closed".to_string();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                close_reason = "gateway shutting down".to_string();
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: close_reason.clone().into(),
                    })))
                    .await;
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(DeviceCommand::Close { reason }) => {
                        close_reason = reason;
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: close_reason.clone().into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        state.outbound.route(LifecycleEvent::message(device.clone(), data));
                    }
                    Some(Ok(Message::Text(text))) => {
                        state
                            .outbound
                            .route(LifecycleEvent::message(device.clone(), text.into_bytes()));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        close_reason = match frame {
                            Some(frame) if !frame.reason.is_empty() => {
                                format!("closed by device: {}", frame.reason)
                            }
                            _ => "closed by device".to_string(),
                        };
                        break;
                    }
                    Some(Err(e)) => {
                        close_reason = format!("transport error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    close_reason = "ping failed".to_string();
                    break;
                }
            }
        }
    }

    state.registry.remove(&device, &handle);
    METRICS.inc_devices_disconnected();

    state
        .outbound
        .route(LifecycleEvent::disconnect(device.clone(), close_reason.clone()));

    tracing::info!(device = %device, reason = %close_reason, "device disconnected");
}
