//! Process-lifetime cache counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of cache activity since the `ApiCache` was created
///
/// Counters are kept in memory only. `total_entries` and `total_versions`
/// are read from the store when the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from a fresh stored version
    pub hits: u64,
    /// Requests that had to call the fetcher
    pub misses: u64,
    /// Fetcher calls that failed
    pub fetch_errors: u64,
    /// Failed fetches answered with a stale version
    pub degraded: u64,
    /// Versions appended (fetched or written)
    pub writes: u64,
    pub total_entries: u64,
    pub total_versions: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) fetch_errors: AtomicU64,
    pub(crate) degraded: AtomicU64,
    pub(crate) writes: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            ..CacheStats::default()
        }
    }
}
