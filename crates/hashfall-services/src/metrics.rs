//! Proxy metrics: lock-free counters shared between a proxy and whoever
//! holds its handle.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    sessions_opened: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    resolution_failures: AtomicU64,
    encode_failures: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_received: AtomicU64,
    acks_received: AtomicU64,
    payloads_delivered: AtomicU64,
    max_in_flight: AtomicUsize,
}

/// Counters for one proxy. Cheap to clone; clones share the counters.
#[derive(Clone, Default)]
pub struct ProxyMetrics {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`ProxyMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub resolution_failures: u64,
    pub encode_failures: u64,
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub acks_received: u64,
    pub payloads_delivered: u64,
    /// Highest number of unacknowledged chunks any single outbound session
    /// ever had.
    pub max_in_flight: usize,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_completed(&self) {
        self.counters.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.counters.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolution_failed(&self) {
        self.counters.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_failed(&self) {
        self.counters.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_sent(&self) {
        self.counters.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_received(&self) {
        self.counters.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_received(&self) {
        self.counters.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_delivered(&self) {
        self.counters.payloads_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the in-flight count of one session after it changed.
    pub fn observe_in_flight(&self, in_flight: usize) {
        self.counters.max_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            sessions_completed: c.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: c.sessions_failed.load(Ordering::Relaxed),
            resolution_failures: c.resolution_failures.load(Ordering::Relaxed),
            encode_failures: c.encode_failures.load(Ordering::Relaxed),
            chunks_sent: c.chunks_sent.load(Ordering::Relaxed),
            chunks_received: c.chunks_received.load(Ordering::Relaxed),
            acks_received: c.acks_received.load(Ordering::Relaxed),
            payloads_delivered: c.payloads_delivered.load(Ordering::Relaxed),
            max_in_flight: c.max_in_flight.load(Ordering::Relaxed),
        }
    }
}
