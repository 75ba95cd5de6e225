use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Operational counters for query decisions.
///
/// Each counter is an independent atomic; snapshots are not required to
/// be mutually consistent across counters.
#[derive(Debug, Default)]
pub struct Statistics {
    blocked: AtomicU64,
    allowed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// A point-in-time read of all four counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocked: u64,
    pub allowed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocked: self.blocked.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Emit a summary line; called by the periodic reporting task.
    pub fn log_summary(&self) {
        let snapshot = self.get_stats();
        info!(
            blocked = snapshot.blocked,
            allowed = snapshot.allowed,
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            hit_rate = %format!("{:.1}%", self.cache_hit_rate() * 100.0),
            "query statistics"
        );
    }
}
