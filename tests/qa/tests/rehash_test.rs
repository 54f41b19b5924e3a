use fleet_ring::{MembershipSnapshot, OwnershipRing};
use gatecast_core::OutboundConfig;
use gatecast_qa_tests::helpers::device::TestDevice;
use gatecast_qa_tests::helpers::gateway::{wait_until, ScriptedMembership, TestGateway};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,gatecast_qa_tests=debug")
        .try_init();
}

#[tokio::test]
async fn qa_201_rehash_disconnects_devices_owned_elsewhere() {
    init_tracing();
    let membership = ScriptedMembership::new(&["gw-a"]);
    let gateway =
        TestGateway::start_with_fleet("gw-a", OutboundConfig::default(), membership.clone()).await;

    // While this node is alone it owns every device.
    let mut devices = Vec::new();
    for n in 0..40 {
        let id = format!("qa-ring-{:03}", n);
        let device = TestDevice::connect(&gateway.device_url(), &id)
            .await
            .expect("device should connect");
        devices.push((id, device));
    }
    wait_until(|| gateway.device_count() == 40).await;

    // A second node joins. The same ring construction the gateway uses tells
    // us exactly which devices now hash elsewhere.
    membership.set(&["gw-a", "gw-b"]);
    let ring = OwnershipRing::build(&MembershipSnapshot::new(vec![
        "gw-a".to_string(),
        "gw-b".to_string(),
    ]));
    let foreign: Vec<String> = devices
        .iter()
        .map(|(id, _)| id.clone())
        .filter(|id| !ring.is_owned_by(id, "gw-a"))
        .collect();
    assert!(!foreign.is_empty(), "expected some devices to move to gw-b");
    assert!(foreign.len() < 40, "expected some devices to stay on gw-a");

    let remaining = 40 - foreign.len();
    wait_until(|| gateway.device_count() == remaining).await;

    // Each displaced device was told why.
    for (id, device) in &mut devices {
        if foreign.contains(id) {
            let reason = device.await_close(Duration::from_secs(5)).await;
            assert_eq!(
                reason.as_deref(),
                Some("ownership moved"),
                "device {} should be closed by the rehash sweep",
                id
            );
        }
    }

    // The survivors are exactly the locally owned set.
    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{}/devices", gateway.control_url()))
        .send()
        .await
        .expect("devices should respond")
        .json()
        .await
        .expect("devices should return JSON");
    let survivors: Vec<String> = body["devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(survivors.len(), remaining);
    for id in &survivors {
        assert!(
            ring.is_owned_by(id, "gw-a"),
            "device {} survived but is owned elsewhere",
            id
        );
    }

    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_202_single_node_fleet_keeps_every_device() {
    init_tracing();
    let membership = ScriptedMembership::new(&["gw-solo"]);
    let gateway =
        TestGateway::start_with_fleet("gw-solo", OutboundConfig::default(), membership.clone())
            .await;

    let mut devices = Vec::new();
    for n in 0..10 {
        let device = TestDevice::connect(&gateway.device_url(), &format!("qa-solo-{}", n))
            .await
            .expect("device should connect");
        devices.push(device);
    }
    wait_until(|| gateway.device_count() == 10).await;

    // Let several poll and rehash cycles pass. Nothing moves on a
    // single-node ring.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(gateway.device_count(), 10);

    // The control surface reflects the coordinated state.
    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{}/fleet", gateway.control_url()))
        .send()
        .await
        .expect("fleet should respond")
        .json()
        .await
        .expect("fleet should return JSON");
    assert_eq!(body["discovery"], true);
    assert_eq!(body["fleetMembers"], 1);

    for device in devices {
        device.close().await;
    }
    gateway.shutdown().await;
}

#[tokio::test]
async fn qa_203_degraded_membership_never_sheds_devices() {
    init_tracing();
    let membership = ScriptedMembership::new(&["gw-a"]);
    let gateway =
        TestGateway::start_with_fleet("gw-a", OutboundConfig::default(), membership.clone()).await;

    let mut devices = Vec::new();
    for n in 0..20 {
        let device = TestDevice::connect(&gateway.device_url(), &format!("qa-safe-{:02}", n))
            .await
            .expect("device should connect");
        devices.push(device);
    }
    wait_until(|| gateway.device_count() == 20).await;

    // Discovery reporting an empty fleet means discovery is broken, not that
    // every peer is gone. Nothing gets disconnected.
    membership.set(&[]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        gateway.device_count(),
        20,
        "empty membership must not shed devices"
    );

    // Same when the list exists but omits this node.
    membership.set(&["gw-b"]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        gateway.device_count(),
        20,
        "membership missing the local node must not shed devices"
    );

    // Recovery back to the truthful view changes nothing for a solo node.
    membership.set(&["gw-a"]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(gateway.device_count(), 20);

    for device in devices {
        device.close().await;
    }
    gateway.shutdown().await;
}
