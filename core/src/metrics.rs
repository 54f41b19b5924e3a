// ABOUTME: Global metrics counters for the Prometheus endpoint
// ABOUTME: Atomic counters incremented from any tier and read from the control server

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics counters accessible from any crate
pub struct Metrics {
    // === Device connection metrics ===
    /// Total device connections accepted
    pub devices_connected: AtomicU64,
    /// Total device connections ended, any cause
    pub devices_disconnected: AtomicU64,
    /// Devices connected right now
    pub device_connections: AtomicU64,

    // === Outbound delivery metrics ===
    /// Events accepted onto a delivery queue
    pub outbound_submitted: AtomicU64,
    /// Events delivered to a destination with a 2xx response
    pub outbound_delivered: AtomicU64,
    /// Delivery attempts retried after a failure
    pub outbound_retries: AtomicU64,
    /// Events abandoned after the retry ceiling (or shutdown cut retries short)
    pub outbound_dropped: AtomicU64,
    /// Events shed at submission because the queue was full or closed
    pub outbound_shed: AtomicU64,
    /// Events discarded because no pipeline is bound for their kind
    pub outbound_unrouted: AtomicU64,

    // === Fleet rehash metrics ===
    /// Rehash passes started
    pub rehash_runs: AtomicU64,
    /// Rehash passes abandoned for a newer membership snapshot
    pub rehash_superseded: AtomicU64,
    /// Devices disconnected because ownership moved to another node
    pub rehash_disconnects: AtomicU64,
    /// Rehash disconnects that found the device already gone
    pub rehash_disconnects_noop: AtomicU64,
    /// Devices kept by the last completed rehash pass
    pub rehash_kept: AtomicU64,
    /// Fleet members in the newest published ring
    pub ring_members: AtomicU64,

    // === Discovery metrics ===
    /// Membership snapshots that differed from the previous one
    pub membership_changes: AtomicU64,
    /// Failed membership fetches from discovery
    pub discovery_errors: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            // Device connection metrics
            devices_connected: AtomicU64::new(0),
            devices_disconnected: AtomicU64::new(0),
            device_connections: AtomicU64::new(0),
            // Outbound delivery metrics
            outbound_submitted: AtomicU64::new(0),
            outbound_delivered: AtomicU64::new(0),
            outbound_retries: AtomicU64::new(0),
            outbound_dropped: AtomicU64::new(0),
            outbound_shed: AtomicU64::new(0),
            outbound_unrouted: AtomicU64::new(0),
            // Fleet rehash metrics
            rehash_runs: AtomicU64::new(0),
            rehash_superseded: AtomicU64::new(0),
            rehash_disconnects: AtomicU64::new(0),
            rehash_disconnects_noop: AtomicU64::new(0),
            rehash_kept: AtomicU64::new(0),
            ring_members: AtomicU64::new(0),
            // Discovery metrics
            membership_changes: AtomicU64::new(0),
            discovery_errors: AtomicU64::new(0),
        }
    }

    pub fn inc_devices_connected(&self) {
        self.devices_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_devices_disconnected(&self) {
        self.devices_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_device_connections(&self, count: u64) {
        self.device_connections.store(count, Ordering::Relaxed);
    }

    // === Outbound delivery metric methods ===

    pub fn inc_outbound_submitted(&self) {
        self.outbound_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outbound_delivered(&self) {
        self.outbound_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outbound_retries(&self) {
        self.outbound_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outbound_dropped(&self) {
        self.outbound_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outbound_shed(&self) {
        self.outbound_shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_outbound_unrouted(&self) {
        self.outbound_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    // === Fleet rehash metric methods ===

    pub fn inc_rehash_runs(&self) {
        self.rehash_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rehash_superseded(&self) {
        self.rehash_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rehash_disconnects(&self) {
        self.rehash_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rehash_disconnects_noop(&self) {
        self.rehash_disconnects_noop.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rehash_kept(&self, count: u64) {
        self.rehash_kept.store(count, Ordering::Relaxed);
    }

    pub fn set_ring_members(&self, count: u64) {
        self.ring_members.store(count, Ordering::Relaxed);
    }

    // === Discovery metric methods ===

    pub fn inc_membership_changes(&self) {
        self.membership_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discovery_errors(&self) {
        self.discovery_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Format all metrics as Prometheus text
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        // Device connection metrics
        output.push_str(
            "# HELP gatecast_devices_connected_total Device connections accepted since start\n",
        );
        output.push_str("# TYPE gatecast_devices_connected_total counter\n");
        output.push_str(&format!(
            "gatecast_devices_connected_total {}\n",
            self.devices_connected.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_devices_disconnected_total Device connections ended, any cause\n",
        );
        output.push_str("# TYPE gatecast_devices_disconnected_total counter\n");
        output.push_str(&format!(
            "gatecast_devices_disconnected_total {}\n",
            self.devices_disconnected.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_device_connections Devices connected right now\n");
        output.push_str("# TYPE gatecast_device_connections gauge\n");
        output.push_str(&format!(
            "gatecast_device_connections {}\n",
            self.device_connections.load(Ordering::Relaxed)
        ));

        // Outbound delivery metrics
        output.push_str(
            "\n# HELP gatecast_outbound_submitted_total Events accepted onto a delivery queue\n",
        );
        output.push_str("# TYPE gatecast_outbound_submitted_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_submitted_total {}\n",
            self.outbound_submitted.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_outbound_delivered_total Events delivered with a 2xx response\n",
        );
        output.push_str("# TYPE gatecast_outbound_delivered_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_delivered_total {}\n",
            self.outbound_delivered.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_outbound_retries_total Delivery attempts retried after a failure\n",
        );
        output.push_str("# TYPE gatecast_outbound_retries_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_retries_total {}\n",
            self.outbound_retries.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_outbound_dropped_total Events abandoned after exhausting retries\n",
        );
        output.push_str("# TYPE gatecast_outbound_dropped_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_dropped_total {}\n",
            self.outbound_dropped.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_outbound_shed_total Events shed at submission because the queue was full or closed\n");
        output.push_str("# TYPE gatecast_outbound_shed_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_shed_total {}\n",
            self.outbound_shed.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_outbound_unrouted_total Events discarded because no pipeline is bound for their kind\n");
        output.push_str("# TYPE gatecast_outbound_unrouted_total counter\n");
        output.push_str(&format!(
            "gatecast_outbound_unrouted_total {}\n",
            self.outbound_unrouted.load(Ordering::Relaxed)
        ));

        // Fleet rehash metrics
        output.push_str("\n# HELP gatecast_rehash_runs_total Rehash passes started\n");
        output.push_str("# TYPE gatecast_rehash_runs_total counter\n");
        output.push_str(&format!(
            "gatecast_rehash_runs_total {}\n",
            self.rehash_runs.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_rehash_superseded_total Rehash passes abandoned for a newer membership snapshot\n");
        output.push_str("# TYPE gatecast_rehash_superseded_total counter\n");
        output.push_str(&format!(
            "gatecast_rehash_superseded_total {}\n",
            self.rehash_superseded.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_rehash_disconnects_total Devices disconnected because ownership moved\n");
        output.push_str("# TYPE gatecast_rehash_disconnects_total counter\n");
        output.push_str(&format!(
            "gatecast_rehash_disconnects_total {}\n",
            self.rehash_disconnects.load(Ordering::Relaxed)
        ));

        output.push_str("\n# HELP gatecast_rehash_disconnects_noop_total Rehash disconnects that found the device already gone\n");
        output.push_str("# TYPE gatecast_rehash_disconnects_noop_total counter\n");
        output.push_str(&format!(
            "gatecast_rehash_disconnects_noop_total {}\n",
            self.rehash_disconnects_noop.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_rehash_kept Devices kept by the last completed rehash pass\n",
        );
        output.push_str("# TYPE gatecast_rehash_kept gauge\n");
        output.push_str(&format!(
            "gatecast_rehash_kept {}\n",
            self.rehash_kept.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_ring_members Fleet members in the newest published ring\n",
        );
        output.push_str("# TYPE gatecast_ring_members gauge\n");
        output.push_str(&format!(
            "gatecast_ring_members {}\n",
            self.ring_members.load(Ordering::Relaxed)
        ));

        // Discovery metrics
        output.push_str("\n# HELP gatecast_membership_changes_total Membership snapshots that differed from the previous one\n");
        output.push_str("# TYPE gatecast_membership_changes_total counter\n");
        output.push_str(&format!(
            "gatecast_membership_changes_total {}\n",
            self.membership_changes.load(Ordering::Relaxed)
        ));

        output.push_str(
            "\n# HELP gatecast_discovery_errors_total Failed membership fetches from discovery\n",
        );
        output.push_str("# TYPE gatecast_discovery_errors_total counter\n");
        output.push_str(&format!(
            "gatecast_discovery_errors_total {}\n",
            self.discovery_errors.load(Ordering::Relaxed)
        ));

        output
    }
}

/// Global metrics instance
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);
