use gatecast_core::OutboundConfig;
use gatecast_qa_tests::helpers::device::TestDevice;
use gatecast_qa_tests::helpers::gateway::{fast_delivery, wait_until, TestGateway};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,gatecast_qa_tests=debug")
        .try_init();
}

#[tokio::test]
async fn qa_101_healthz_reports_devices() {
    init_tracing();
    let gateway = TestGateway::start(OutboundConfig::default()).await;
    let client = reqwest::Client::new();

    let device = TestDevice::connect(&gateway.device_url(), "qa-dev-101")
        .await
        .expect("device should connect");
    wait_until(|| gateway.device_count() == 1).await;

    let body: serde_json::Value = client
        .get(format!("{}/healthz", gateway.control_url()))
        .send()
        .await
        .expect("healthz should respond")
        .json()
        .await
        .expect("healthz should return JSON");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"], 1);
    assert!(body["nodeId"].is_string());

    device.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_102_metrics_exposes_counters() {
    init_tracing();
    let gateway = TestGateway::start(OutboundConfig::default()).await;
    let client = reqwest::Client::new();

    let device = TestDevice::connect(&gateway.device_url(), "qa-dev-102")
        .await
        .expect("device should connect");
    wait_until(|| gateway.device_count() == 1).await;

    let response = client
        .get(format!("{}/metrics", gateway.control_url()))
        .send()
        .await
        .expect("metrics should respond");
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(
        content_type.starts_with("text/plain"),
        "unexpected content type: {}",
        content_type
    );

    let text = response.text().await.expect("metrics body should read");
    for name in [
        "gatecast_devices_connected_total",
        "gatecast_device_connections",
        "gatecast_outbound_submitted_total",
        "gatecast_outbound_delivered_total",
        "gatecast_outbound_shed_total",
        "gatecast_rehash_runs_total",
        "gatecast_ring_members",
    ] {
        assert!(text.contains(name), "metrics output missing {}", name);
    }

    device.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_103_operator_force_disconnect() {
    init_tracing();
    let gateway = TestGateway::start(OutboundConfig::default()).await;
    let client = reqwest::Client::new();

    let mut device = TestDevice::connect(&gateway.device_url(), "qa-dev-103")
        .await
        .expect("device should connect");
    wait_until(|| gateway.device_count() == 1).await;

    let response = client
        .delete(format!("{}/devices/qa-dev-103", gateway.control_url()))
        .send()
        .await
        .expect("disconnect request should respond");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("body should be JSON");
    assert_eq!(body["outcome"], "disconnected");

    let reason = device.await_close(Duration::from_secs(5)).await;
    assert_eq!(reason.as_deref(), Some("disconnected by operator"));
    wait_until(|| gateway.device_count() == 0).await;

    // Disconnecting a device that is already gone reports so without error.
    let response = client
        .delete(format!("{}/devices/qa-dev-103", gateway.control_url()))
        .send()
        .await
        .expect("second disconnect should respond");
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.expect("body should be JSON");
    assert_eq!(body["outcome"], "not-connected");

    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_104_device_listing_and_fleet_status() {
    init_tracing();
    let outbound = OutboundConfig {
        connect: Some(fast_delivery(vec![
            "http://127.0.0.1:9/events".to_string(), // never reached
        ])),
        ..OutboundConfig::default()
    };
    let gateway = TestGateway::start(outbound).await;
    let client = reqwest::Client::new();

    let device_b = TestDevice::connect(&gateway.device_url(), "qa-dev-104-b")
        .await
        .expect("device should connect");
    let device_a = TestDevice::connect(&gateway.device_url(), "qa-dev-104-a")
        .await
        .expect("device should connect");
    wait_until(|| gateway.device_count() == 2).await;

    // Listing is sorted regardless of connect order.
    let body: serde_json::Value = client
        .get(format!("{}/devices", gateway.control_url()))
        .send()
        .await
        .expect("devices should respond")
        .json()
        .await
        .expect("devices should return JSON");
    assert_eq!(body["count"], 2);
    assert_eq!(body["devices"][0], "qa-dev-104-a");
    assert_eq!(body["devices"][1], "qa-dev-104-b");

    // Without discovery the fleet endpoint reports standalone operation.
    let body: serde_json::Value = client
        .get(format!("{}/fleet", gateway.control_url()))
        .send()
        .await
        .expect("fleet should respond")
        .json()
        .await
        .expect("fleet should return JSON");
    assert_eq!(body["discovery"], false);
    assert_eq!(body["fleetMembers"], 0);
    assert_eq!(body["boundKinds"][0], "connect");

    device_a.close().await;
    device_b.close().await;
    gateway.shutdown().await;
}
