//! Cache Statistics Module
//!
//! Counters behind `cache_stats()`: memory hits, mirror (offline) hits,
//! misses, evictions and the memory-only degradation flag.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads answered from memory
    pub hits: u64,
    /// Reads answered from the durable mirror after a memory miss
    pub offline_hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Entries removed by eviction passes
    pub evictions: u64,
    /// Current number of entries in memory
    pub total_entries: usize,
    /// Set once durable writes have been abandoned
    pub memory_only: bool,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Fraction of reads served from memory or mirror.
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.offline_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_offline_hit(&mut self) {
        self.offline_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
