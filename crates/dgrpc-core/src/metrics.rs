//! Transport-level counters, following the same `const fn new()` /
//! `AtomicU64` / `static` pattern the ingest crate this repository grew from
//! uses for its pipeline stage metrics.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct TransportMetrics {
    pub calls_received: AtomicU64,
    pub calls_dispatched: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub decode_failures: AtomicU64,
    pub send_failures: AtomicU64,
}

impl TransportMetrics {
    pub const fn new() -> Self {
        Self {
            calls_received: AtomicU64::new(0),
            calls_dispatched: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            calls_received: self.calls_received.load(Ordering::Relaxed),
            calls_dispatched: self.calls_dispatched.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TransportMetricsSnapshot {
    pub calls_received: u64,
    pub calls_dispatched: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub decode_failures: u64,
    pub send_failures: u64,
}

pub static METRICS: TransportMetrics = TransportMetrics::new();
