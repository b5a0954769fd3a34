//! Metrics (C3, spec §4.2) — monotonic counters with a derived `hit_rate`.
//!
//! Mirrors the `AtomicU64` counter + periodic stats-log pattern in
//! `response_cache.rs` (`request_count: AtomicU64`, `maybe_log_stats`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// How often (in `get` calls) to emit a metrics summary log line, ported
/// from `response_cache.rs::STATS_LOG_EVERY_N`.
const STATS_LOG_EVERY_N: u64 = 100;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    loads: AtomicU64,
    batch_calls: AtomicU64,
}

/// Monotonic counters for a `Cache`. Cheaply cloneable (shares the
/// underlying atomics via `Arc`) so it can be handed to callers who only
/// want read access to `get_metrics()` without borrowing the cache.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counters: Arc<Counters>,
}

/// A point-in-time, internally-consistent view of the counters plus the
/// derived `hit_rate` (spec §3, §8 invariant 6: `0` when both `hits` and
/// `misses` are `0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub loads: u64,
    pub batch_calls: u64,
    pub hit_rate: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joined single-flight/batch waiters are also hits — see
    /// `SPEC_FULL.md`'s resolution of Open Question 2. Every call into the
    /// facade records exactly one of `record_hit`/`record_miss`.
    pub fn record_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.maybe_log();
    }

    pub fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.maybe_log();
    }

    pub fn record_eviction(&self) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_call(&self, n: usize) {
        self.counters.batch_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(batch_size = n, "batch loader invoked");
    }

    fn maybe_log(&self) {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total != 0 && total.is_multiple_of(STATS_LOG_EVERY_N) {
            tracing::info!(
                hits,
                misses,
                hit_rate = format!("{:.1}%", hit_rate(hits, misses) * 100.0),
                "cache statistics"
            );
        }
    }

    /// Internally-consistent snapshot: all five counters are read while no
    /// concurrent `record_*` call can interleave a partial update, because
    /// each counter is a single atomic and the derived `hit_rate` is
    /// computed from the same read pair (`hits`, `misses`) used to report
    /// it (spec §4.2: "snapshots are internally consistent").
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            batch_calls: self.counters.batch_calls.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_when_empty() {
        let m = Metrics::new();
        assert_eq!(m.snapshot().hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_reflects_counters() {
        let m = Metrics::new();
        m.record_hit();
        m.record_hit();
        m.record_hit();
        m.record_miss();
        let snap = m.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn eviction_and_load_and_batch_counters_independent() {
        let m = Metrics::new();
        m.record_eviction();
        m.record_load();
        m.record_batch_call(7);
        let snap = m.snapshot();
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.loads, 1);
        assert_eq!(snap.batch_calls, 1);
    }
}
