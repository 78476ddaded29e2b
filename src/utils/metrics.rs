//! Observability and Metrics
//!
//! Process-wide counters updated from the codec, the transports and the
//! sessions. They only observe: nothing in the protocol reads them back to
//! make a decision.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections opened
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Packets written (TCP and UDP)
    pub packets_sent: AtomicU64,
    /// Packets decoded (TCP and UDP)
    pub packets_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// TCP frames skipped because their payload failed to decode
    pub frames_dropped: AtomicU64,
    /// Stream buffers discarded after a magic mismatch
    pub magic_resyncs: AtomicU64,
    /// Datagrams dropped (bad header, unknown id, endpoint mismatch, decode failure)
    pub datagrams_dropped: AtomicU64,
    /// UDP endpoints pinned to a peer
    pub endpoints_pinned: AtomicU64,
    /// Per-recipient broadcast failures
    pub broadcast_failures: AtomicU64,
    /// Passthrough packets relayed to other peers
    pub packets_relayed: AtomicU64,
    /// Connections refused because no client id was free
    pub connections_dropped: AtomicU64,
    /// Connection errors surfaced to the application
    pub connection_errors: AtomicU64,
    /// Events discarded from a full backlog before the stream was taken
    pub events_dropped: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            magic_resyncs: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            endpoints_pinned: AtomicU64::new(0),
            broadcast_failures: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            connections_dropped: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: a connection that never opened still closes
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn magic_resync(&self) {
        self.magic_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn endpoint_pinned(&self) {
        self.endpoints_pinned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_failure(&self) {
        self.broadcast_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_relayed(&self) {
        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_dropped(&self) {
        self.connections_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            magic_resyncs: self.magic_resyncs.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            endpoints_pinned: self.endpoints_pinned.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_failures.load(Ordering::Relaxed),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            connections_dropped: self.connections_dropped.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            frames_dropped = snapshot.frames_dropped,
            magic_resyncs = snapshot.magic_resyncs,
            datagrams_dropped = snapshot.datagrams_dropped,
            endpoints_pinned = snapshot.endpoints_pinned,
            broadcast_failures = snapshot.broadcast_failures,
            packets_relayed = snapshot.packets_relayed,
            connections_dropped = snapshot.connections_dropped,
            connection_errors = snapshot.connection_errors,
            events_dropped = snapshot.events_dropped,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
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
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_dropped: u64,
    pub magic_resyncs: u64,
    pub datagrams_dropped: u64,
    pub endpoints_pinned: u64,
    pub broadcast_failures: u64,
    pub packets_relayed: u64,
    pub connections_dropped: u64,
    pub connection_errors: u64,
    pub events_dropped: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Logs how long a scope took when dropped
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
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}
