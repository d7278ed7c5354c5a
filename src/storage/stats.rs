use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::storage::traits::BackendKind;

/// Process-wide cumulative cache counters. Created once at startup and
/// handed to the cache by reference; only `reset` clears them.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    set_failures: AtomicU64,
    deletes: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set_failure(&self) {
        self.set_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.set_failures.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connected: bool, backend: BackendKind, cached_categories: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            connected,
            backend,
            cached_categories,
        }
    }
}

/// Point-in-time copy of the counters plus backend state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub set_failures: u64,
    pub deletes: u64,
    pub connected: bool,
    pub backend: BackendKind,
    pub cached_categories: usize,
}

impl CacheStats {
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
