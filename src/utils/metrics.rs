//! Observability and Metrics
//!
//! Counters for calls, packets, and stream lifecycles. Uses atomics so every
//! broker task can record without coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for bridge operations
#[derive(Debug)]
pub struct Metrics {
    /// Calls issued by this process
    pub calls_total: AtomicU64,
    /// Calls served by a local handler without packets
    pub calls_local: AtomicU64,
    /// Calls sent to another node
    pub calls_remote: AtomicU64,
    /// Calls that resolved to an error
    pub calls_failed: AtomicU64,
    /// Calls that hit their deadline
    pub calls_timed_out: AtomicU64,
    /// Packets handed to the transporter
    pub packets_sent: AtomicU64,
    /// Packets received from the transporter
    pub packets_received: AtomicU64,
    /// Encoded bytes sent
    pub bytes_sent: AtomicU64,
    /// Encoded bytes received
    pub bytes_received: AtomicU64,
    /// Payloads dropped because they failed to decode
    pub malformed_packets: AtomicU64,
    /// Stream packets dropped because their proxy was already settled
    pub late_packets: AtomicU64,
    /// Stream proxies registered
    pub streams_opened: AtomicU64,
    /// Stream proxies settled as ended
    pub streams_ended: AtomicU64,
    /// Stream proxies settled as errored
    pub streams_errored: AtomicU64,
    /// `STREAM_ACK` packets sent
    pub acks_sent: AtomicU64,
    /// `STREAM_ACK` packets received
    pub acks_received: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            calls_total: AtomicU64::new(0),
            calls_local: AtomicU64::new(0),
            calls_remote: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            calls_timed_out: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            late_packets: AtomicU64::new(0),
            streams_opened: AtomicU64::new(0),
            streams_ended: AtomicU64::new(0),
            streams_errored: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn call_started(&self, remote: bool) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        if remote {
            self.calls_remote.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_local.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn call_failed(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_timed_out(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn malformed_packet(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn late_packet(&self) {
        self.late_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_ended(&self) {
        self.streams_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_errored(&self) {
        self.streams_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_received(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_total: self.calls_total.load(Ordering::Relaxed),
            calls_local: self.calls_local.load(Ordering::Relaxed),
            calls_remote: self.calls_remote.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            calls_timed_out: self.calls_timed_out.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            late_packets: self.late_packets.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_ended: self.streams_ended.load(Ordering::Relaxed),
            streams_errored: self.streams_errored.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            calls_total = s.calls_total,
            calls_local = s.calls_local,
            calls_remote = s.calls_remote,
            calls_failed = s.calls_failed,
            calls_timed_out = s.calls_timed_out,
            packets_sent = s.packets_sent,
            packets_received = s.packets_received,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            malformed_packets = s.malformed_packets,
            late_packets = s.late_packets,
            streams_opened = s.streams_opened,
            streams_ended = s.streams_ended,
            streams_errored = s.streams_errored,
            acks_sent = s.acks_sent,
            acks_received = s.acks_received,
            uptime_seconds = s.uptime_seconds,
            "Bridge metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub calls_total: u64,
    pub calls_local: u64,
    pub calls_remote: u64,
    pub calls_failed: u64,
    pub calls_timed_out: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
    pub late_packets: u64,
    pub streams_opened: u64,
    pub streams_ended: u64,
    pub streams_errored: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}
