use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics collector for a load test run
pub struct Metrics {
    /// Connect latency histogram (microseconds)
    connect_latency: parking_lot::Mutex<Histogram<u64>>,

    /// Connection counters
    connects_total: AtomicU64,
    connects_failed: AtomicU64,
    reconnects: AtomicU64,

    /// Message counters
    messages_sent: AtomicU64,
    send_errors: AtomicU64,

    /// Timing
    start_time: Instant,
    end_time: parking_lot::Mutex<Option<Instant>>,

    /// Timeline snapshots
    timeline: parking_lot::Mutex<Vec<TimelinePoint>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connect_latency: parking_lot::Mutex::new(
                Histogram::new_with_bounds(1, 600_000_000, 3).unwrap(), // 1μs to 10min
            ),
            connects_total: AtomicU64::new(0),
            connects_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            start_time: Instant::now(),
            end_time: parking_lot::Mutex::new(None),
            timeline: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn record_connect(&self, duration: Duration, success: bool) {
        if success {
            let micros = duration.as_micros() as u64;
            if let Some(mut hist) = self.connect_latency.try_lock() {
                let _ = hist.record(micros);
            }
            self.connects_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connects_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self, success: bool) {
        if success {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.send_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TimelinePoint {
        let hist = self.connect_latency.lock();
        TimelinePoint {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            connects_total: self.connects_total.load(Ordering::Relaxed),
            connect_p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            connect_p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
        }
    }

    pub fn add_timeline_point(&self) {
        let point = self.snapshot();
        self.timeline.lock().push(point);
    }

    pub fn finish(&self) {
        *self.end_time.lock() = Some(Instant::now());
    }

    pub fn summary(&self) -> MetricsSummary {
        let duration = self.end_time.lock().unwrap_or(Instant::now()) - self.start_time;
        let sent = self.messages_sent.load(Ordering::Relaxed);
        let errors = self.send_errors.load(Ordering::Relaxed);
        let hist = self.connect_latency.lock();

        MetricsSummary {
            duration_secs: duration.as_secs_f64(),
            messages_per_second: if duration.as_secs_f64() > 0.0 {
                sent as f64 / duration.as_secs_f64()
            } else {
                0.0
            },
            messages_sent: sent,
            send_errors: errors,
            devices_connected: self.connects_total.load(Ordering::Relaxed),
            connect_failures: self.connects_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_min_ms: hist.min() as f64 / 1000.0,
            connect_p50_ms: hist.value_at_quantile(0.50) as f64 / 1000.0,
            connect_p95_ms: hist.value_at_quantile(0.95) as f64 / 1000.0,
            connect_p99_ms: hist.value_at_quantile(0.99) as f64 / 1000.0,
            connect_max_ms: hist.max() as f64 / 1000.0,
            error_rate: if sent + errors > 0 {
                errors as f64 / (sent + errors) as f64
            } else {
                0.0
            },
        }
    }

    pub fn to_results(&self, metadata: TestMetadata) -> TestResults {
        TestResults {
            metadata,
            summary: self.summary(),
            timeline: self.timeline.lock().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMetadata {
    pub url: String,
    pub devices: usize,
    pub rate: f64,
    pub duration_secs: u64,
    pub payload_size: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub messages_per_second: f64,
    pub messages_sent: u64,
    pub send_errors: u64,
    pub devices_connected: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub connect_min_ms: f64,
    pub connect_p50_ms: f64,
    pub connect_p95_ms: f64,
    pub connect_p99_ms: f64,
    pub connect_max_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub elapsed_secs: f64,
    pub messages_sent: u64,
    pub send_errors: u64,
    pub connects_total: u64,
    pub connect_p50_ms: f64,
    pub connect_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub metadata: TestMetadata,
    pub summary: MetricsSummary,
    pub timeline: Vec<TimelinePoint>,
}

impl TestResults {
    pub fn format_text(&self) -> String {
        let s = &self.summary;
        format!(
            r#"Gatecast Load Test Results
==========================
Target:        {}
Devices:       {}
Rate:          {:.1} msg/s per device
Duration:      {:.1}s
Payload:       {} bytes

Summary:
  Messages:     {}
  Throughput:   {:.1} msg/s
  Send Errors:  {}

Connect Latency (ms):
  Min:   {:.1}
  p50:   {:.1}
  p95:   {:.1}
  p99:   {:.1}
  Max:   {:.1}

Connections:
  Established: {}
  Failed:      {}
  Reconnects:  {}"#,
            self.metadata.url,
            self.metadata.devices,
            self.metadata.rate,
            s.duration_secs,
            self.metadata.payload_size,
            s.messages_sent,
            s.messages_per_second,
            s.send_errors,
            s.connect_min_ms,
            s.connect_p50_ms,
            s.connect_p95_ms,
            s.connect_p99_ms,
            s.connect_max_ms,
            s.devices_connected,
            s.connect_failures,
            s.reconnects,
        )
    }

    pub fn format_csv(&self) -> String {
        let s = &self.summary;
        format!(
            "url,devices,rate,duration_secs,payload_bytes,messages,mps,error_rate,connect_p50_ms,connect_p95_ms,connect_p99_ms\n{},{},{:.1},{:.1},{},{},{:.1},{:.3},{:.1},{:.1},{:.1}",
            self.metadata.url,
            self.metadata.devices,
            self.metadata.rate,
            s.duration_secs,
            self.metadata.payload_size,
            s.messages_sent,
            s.messages_per_second,
            s.error_rate,
            s.connect_p50_ms,
            s.connect_p95_ms,
            s.connect_p99_ms,
        )
    }

    pub fn compare(&self, other: &TestResults) -> String {
        let s1 = &self.summary;
        let s2 = &other.summary;

        let mps_diff =
            ((s1.messages_per_second - s2.messages_per_second) / s2.messages_per_second) * 100.0;
        let p50_diff = ((s1.connect_p50_ms - s2.connect_p50_ms) / s2.connect_p50_ms) * 100.0;
        let p99_diff = ((s1.connect_p99_ms - s2.connect_p99_ms) / s2.connect_p99_ms) * 100.0;

        format!(
            r#"Comparison
==========
                    Current     Baseline    Change
Throughput (msg/s): {:.1}       {:.1}       {:+.1}%
Connect p50 (ms):   {:.1}       {:.1}       {:+.1}%
Connect p99 (ms):   {:.1}       {:.1}       {:+.1}%"#,
            s1.messages_per_second,
            s2.messages_per_second,
            mps_diff,
            s1.connect_p50_ms,
            s2.connect_p50_ms,
            p50_diff,
            s1.connect_p99_ms,
            s2.connect_p99_ms,
            p99_diff,
        )
    }
}
