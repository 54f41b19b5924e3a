use gatecast_core::{EventKind, OutboundConfig};
use gatecast_qa_tests::helpers::device::TestDevice;
use gatecast_qa_tests::helpers::gateway::{fast_delivery, wait_until, TestGateway};
use gatecast_qa_tests::helpers::sinks::DeliverySink;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,gatecast_qa_tests=debug")
        .try_init();
}

const SINK_WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn qa_001_connect_event_delivered() {
    init_tracing();
    let sink = DeliverySink::start().await;
    let outbound = OutboundConfig {
        connect: Some(fast_delivery(vec![sink.url()])),
        ..OutboundConfig::default()
    };
    let gateway = TestGateway::start(outbound).await;

    let device = TestDevice::connect(&gateway.device_url(), "qa-dev-001")
        .await
        .expect("device should connect");

    let envelopes = sink.wait_for(1, SINK_WAIT).await;
    assert_eq!(envelopes[0].event, EventKind::Connect);
    assert_eq!(envelopes[0].device_id, "qa-dev-001");
    assert!(
        envelopes[0].remote_addr.is_some(),
        "connect envelope should carry the peer address"
    );

    device.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_002_message_event_carries_payload() {
    init_tracing();
    let sink = DeliverySink::start().await;
    let outbound = OutboundConfig {
        message_received: Some(fast_delivery(vec![sink.url()])),
        ..OutboundConfig::default()
    };
    let gateway = TestGateway::start(outbound).await;

    let mut device = TestDevice::connect(&gateway.device_url(), "qa-dev-002")
        .await
        .expect("device should connect");
    device.send_binary(vec![0xde, 0xad, 0xbe, 0xef]).await;
    device.send_text("hello gateway").await;

    // Frames from one device arrive at the sink in the order they were sent.
    let envelopes = sink.wait_for(2, SINK_WAIT).await;
    assert!(envelopes.iter().all(|e| e.event == EventKind::MessageReceived));
    assert_eq!(envelopes[0].decode_body(), Some(vec![0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(envelopes[1].decode_body(), Some(b"hello gateway".to_vec()));

    device.close().await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_003_disconnect_event_on_close() {
    init_tracing();
    let sink = DeliverySink::start().await;
    let outbound = OutboundConfig {
        disconnect: Some(fast_delivery(vec![sink.url()])),
        ..OutboundConfig::default()
    };
    let gateway = TestGateway::start(outbound).await;

    let device = TestDevice::connect(&gateway.device_url(), "qa-dev-003")
        .await
        .expect("device should connect");
    device.close().await;

    let envelopes = sink.wait_for(1, SINK_WAIT).await;
    assert_eq!(envelopes[0].event, EventKind::Disconnect);
    assert_eq!(envelopes[0].device_id, "qa-dev-003");
    let reason = envelopes[0]
        .reason
        .as_deref()
        .expect("disconnect envelope should carry a reason");
    assert!(
        reason.contains("closed by device"),
        "unexpected reason: {}",
        reason
    );

    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_004_legacy_config_routes_only_messages() {
    init_tracing();
    let sink = DeliverySink::start().await;
    let outbound = OutboundConfig {
        legacy: fast_delivery(vec![sink.url()]),
        ..OutboundConfig::default()
    };
    let gateway = TestGateway::start(outbound).await;

    let mut device = TestDevice::connect(&gateway.device_url(), "qa-dev-004")
        .await
        .expect("device should connect");
    device.send_text("only this should arrive").await;
    device.close().await;

    // Connect, message, and disconnect have all happened by now; under the
    // legacy layout only the message has a pipeline.
    sink.wait_for(1, SINK_WAIT).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let envelopes = sink.received();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].event, EventKind::MessageReceived);

    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_005_missing_device_id_rejected() {
    init_tracing();
    let gateway = TestGateway::start(OutboundConfig::default()).await;
    let url = gateway.device_url();

    let err = tokio_tungstenite::connect_async(url.as_str())
        .await
        .err()
        .expect("handshake without a device id should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("expected HTTP rejection, got: {}", other),
    }

    // An empty id via the query string is rejected the same way.
    let with_empty = format!("{}?id=", url);
    assert!(tokio_tungstenite::connect_async(with_empty.as_str())
        .await
        .is_err());

    // A real id via the query string is the fallback for clients that
    // cannot set headers.
    let with_query = format!("{}?id=qa-dev-005", url);
    let (mut ws, _) = tokio_tungstenite::connect_async(with_query.as_str())
        .await
        .expect("query string id should be accepted");
    let _ = ws.close(None).await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_006_duplicate_device_id_closes_previous() {
    init_tracing();
    let gateway = TestGateway::start(OutboundConfig::default()).await;

    let mut first = TestDevice::connect(&gateway.device_url(), "qa-dev-006")
        .await
        .expect("first connection should succeed");
    let mut second = TestDevice::connect(&gateway.device_url(), "qa-dev-006")
        .await
        .expect("second connection should succeed");

    let reason = first.await_close(Duration::from_secs(5)).await;
    assert_eq!(reason.as_deref(), Some("superseded by new connection"));

    // The replacement stays registered and usable.
    second.send_text("still alive").await;
    wait_until(|| gateway.device_count() == 1).await;

    second.close().await;
    gateway.shutdown().await;
}
