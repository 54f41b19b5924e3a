use crate::client::{ControlClient, DeviceConnection};
use crate::metrics::{Metrics, TestMetadata};
use crate::RunArgs;
use anyhow::Result;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub async fn run_loadtest(args: RunArgs) -> Result<()> {
    if args.devices == 0 {
        anyhow::bail!("need at least one device");
    }
    if args.rate <= 0.0 {
        anyhow::bail!("rate must be positive");
    }

    tracing::info!(
        "Starting load test against {} with {} devices",
        args.url,
        args.devices
    );
    tracing::info!(
        "Rate: {} msg/s per device, Duration: {}s, Payload: {} bytes",
        args.rate,
        args.duration,
        args.payload_size
    );

    // Fetch gateway metrics before the run, so the after-run delta isolates
    // this test's traffic.
    let control = ControlClient::new(&args.control_url)?;
    let metrics_before = match control.fetch_metrics().await {
        Ok(m) => {
            tracing::info!(
                "Gateway metrics before: connected={}, submitted={}, delivered={}, shed={}",
                m.devices_connected,
                m.outbound_submitted,
                m.outbound_delivered,
                m.outbound_shed
            );
            Some(m)
        }
        Err(e) => {
            tracing::warn!("Could not fetch gateway metrics: {}", e);
            None
        }
    };

    let metrics = Arc::new(Metrics::new());
    let running = Arc::new(AtomicBool::new(true));

    let duration = Duration::from_secs(args.duration);
    let ramp_up = Duration::from_secs(args.ramp_up);
    let send_interval = Duration::from_secs_f64(1.0 / args.rate);
    let start = Instant::now();

    // Spawn progress reporter
    let progress_metrics = metrics.clone();
    let progress_running = running.clone();
    let report_interval = args.report_interval;
    let progress_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(report_interval));
        while progress_running.load(Ordering::Relaxed) {
            interval.tick().await;
            progress_metrics.add_timeline_point();
            let snapshot = progress_metrics.snapshot();
            let rate = if snapshot.elapsed_secs > 0.0 {
                snapshot.messages_sent as f64 / snapshot.elapsed_secs
            } else {
                0.0
            };
            tracing::info!(
                "Progress: {} msgs, {:.1} msg/s, connects={}, connect p99={:.1}ms, errors={}",
                snapshot.messages_sent,
                rate,
                snapshot.connects_total,
                snapshot.connect_p99_ms,
                snapshot.send_errors
            );
        }
    });

    // Spawn device tasks
    let mut handles = Vec::new();
    for device_num in 0..args.devices {
        let url = args.url.clone();
        let device_id = format!("{}-{:05}", args.prefix, device_num);
        let metrics = metrics.clone();
        let running = running.clone();
        let payload_size = args.payload_size;

        // Spread connects across the ramp-up window
        let device_delay = if args.devices > 1 {
            ramp_up.as_millis() as u64 * device_num as u64 / (args.devices - 1) as u64
        } else {
            0
        };

        let handle = tokio::spawn(async move {
            if device_delay > 0 {
                tokio::time::sleep(Duration::from_millis(device_delay)).await;
            }

            drive_device(
                &url,
                &device_id,
                payload_size,
                send_interval,
                start,
                duration,
                running,
                metrics,
            )
            .await;
        });

        handles.push(handle);
    }

    // Wait for all devices
    for handle in handles {
        let _ = handle.await;
    }

    // Stop progress reporter
    running.store(false, Ordering::Relaxed);
    let _ = progress_handle.await;

    // Fetch gateway metrics after the run
    let metrics_after = match control.fetch_metrics().await {
        Ok(m) => {
            tracing::info!(
                "Gateway metrics after: connected={}, submitted={}, delivered={}, shed={}",
                m.devices_connected,
                m.outbound_submitted,
                m.outbound_delivered,
                m.outbound_shed
            );
            Some(m)
        }
        Err(e) => {
            tracing::warn!("Could not fetch gateway metrics: {}", e);
            None
        }
    };

    // Delivery pipeline deltas, gateway side
    if let (Some(before), Some(after)) = (&metrics_before, &metrics_after) {
        let submitted = after
            .outbound_submitted
            .saturating_sub(before.outbound_submitted);
        let delivered = after
            .outbound_delivered
            .saturating_sub(before.outbound_delivered);
        let shed = after.outbound_shed.saturating_sub(before.outbound_shed);
        let dropped = after
            .outbound_dropped
            .saturating_sub(before.outbound_dropped);

        println!("\n=== Gateway Delivery Metrics ===");
        println!("Events submitted: {}", submitted);
        println!("Events delivered: {}", delivered);
        println!("Events shed:      {}", shed);
        println!("Events dropped:   {}", dropped);
    }

    // Finalize metrics
    metrics.finish();
    metrics.add_timeline_point();

    // Generate results
    let metadata = TestMetadata {
        url: args.url.clone(),
        devices: args.devices,
        rate: args.rate,
        duration_secs: args.duration,
        payload_size: args.payload_size,
        timestamp: chrono::Utc::now(),
    };

    let results = metrics.to_results(metadata);

    // Print summary
    println!("\n{}", results.format_text());

    // Save to file
    let json = serde_json::to_string_pretty(&results)?;
    std::fs::write(&args.output, &json)?;
    tracing::info!("Results saved to {:?}", args.output);

    Ok(())
}

/// One device's life: connect, send at the configured rate, reconnect when
/// the gateway drops us, until the test window closes.
#[allow(clippy::too_many_arguments)]
async fn drive_device(
    url: &str,
    device_id: &str,
    payload_size: usize,
    send_interval: Duration,
    start: Instant,
    duration: Duration,
    running: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
) {
    let mut conn: Option<DeviceConnection> = None;
    let mut connected_once = false;
    let mut payload = vec![0u8; payload_size];

    while start.elapsed() < duration && running.load(Ordering::Relaxed) {
        if conn.is_none() {
            let outcome = DeviceConnection::connect(url, device_id).await;
            metrics.record_connect(outcome.duration, outcome.connection.is_some());
            match outcome.connection {
                Some(c) => {
                    if connected_once {
                        metrics.record_reconnect();
                    }
                    connected_once = true;
                    conn = Some(c);
                }
                None => {
                    if let Some(err) = outcome.error {
                        tracing::debug!("{} connect failed: {}", device_id, err);
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            }
        }

        let Some(ws) = conn.as_mut() else { continue };

        rand::thread_rng().fill_bytes(&mut payload);
        if let Err(e) = ws.send(payload.clone()).await {
            tracing::debug!("{} send failed: {}", device_id, e);
            metrics.record_send(false);
            conn = None;
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }
        metrics.record_send(true);

        if !ws.drain().await {
            tracing::debug!("{} closed by gateway", device_id);
            conn = None;
            continue;
        }

        tokio::time::sleep(send_interval).await;
    }

    if let Some(ws) = conn.take() {
        ws.close().await;
    }
}
