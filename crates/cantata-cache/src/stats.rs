//! Cache statistics tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    puts: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss (absent or empty entry).
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recompute of a present but stale entry.
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store write.
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend read failure.
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a backend write failure.
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats.
    #[must_use]
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let refreshes = self.refreshes.load(Ordering::Relaxed);
        let total = hits + misses + refreshes;
        CacheStatsSnapshot {
            hits,
            misses,
            refreshes,
            puts: self.puts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStatsSnapshot {
    /// Fresh hits.
    pub hits: u64,
    /// Misses.
    pub misses: u64,
    /// Stale entries recomputed.
    pub refreshes: u64,
    /// Store writes.
    pub puts: u64,
    /// Backend read failures.
    pub read_errors: u64,
    /// Backend write failures.
    pub write_errors: u64,
    /// Hits over all lookups (0.0 - 1.0).
    pub hit_rate: f64,
}
