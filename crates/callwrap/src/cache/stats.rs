//! Cache statistics and metrics tracking
//!
//! This module provides types for tracking cache performance metrics
//! including hit rates, eviction counts, and expirations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Current number of stored entries, including expired ones not yet
    /// removed
    pub size: usize,

    /// Maximum allowed entries (None = unlimited)
    pub max_entries: Option<usize>,

    /// Lookups answered from a live entry
    pub hits: u64,

    /// Lookups that found no live entry
    pub misses: u64,

    /// Values stored
    pub inserts: u64,

    /// Live entries removed to make room
    pub evictions: u64,

    /// Expired entries removed
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total accesses)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate miss rate (misses / total accesses)
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// Total number of access operations (hits + misses)
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Thread-safe metrics collector for cache operations
///
/// This struct uses atomic operations to track cache metrics
/// without requiring locks, enabling low-overhead monitoring.
#[derive(Debug, Clone, Default)]
pub(crate) struct MetricsCollector {
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    inserts: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl MetricsCollector {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub(crate) fn snapshot(&self, size: usize, max_entries: Option<usize>) -> CacheStats {
        CacheStats {
            size,
            max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.inserts.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}
