use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read-only snapshot of a keyed cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held, stale or not.
    pub total_entries: usize,
    /// Entries still inside their TTL.
    pub valid_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits that returned a stale value.
    pub stale_hits: u64,
    /// Entries removed by capacity sweeps.
    pub evictions: u64,
    /// Failure counts from the cache's window tracker.
    pub by_domain_failure_counts: HashMap<String, u32>,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Stale hits count as hits.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
