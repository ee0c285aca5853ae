//! Stale-while-revalidate keyed cache.

use super::read::CacheRead;
use super::stats::CacheStats;
use super::subscription::{CacheEvent, CacheListener, ListenerSet, Subscription};
use chrono::Utc;
use dashmap::DashMap;
use ideafit_core::{fingerprint, SwrCacheConfig, Timestamp};
use ideafit_resilience::WindowTracker;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    cached_at: Timestamp,
    inserted: Instant,
    ttl: Duration,
    stale: bool,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() >= self.ttl
    }
}

/// Generic TTL cache that keeps serving expired entries.
///
/// Staleness never evicts. Entries leave only through [`KeyedCache::remove`],
/// [`KeyedCache::clear`], or the age sweep that `set` runs once the entry
/// count exceeds the configured capacity.
///
/// The cache also owns a per-domain [`WindowTracker`] so callers that fetch
/// through it can gate upstream calls without a separate breaker.
pub struct KeyedCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    config: SwrCacheConfig,
    window: WindowTracker,
    listeners: ListenerSet,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> KeyedCache<T> {
    pub fn new(config: SwrCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            window: WindowTracker::new(),
            listeners: ListenerSet::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SwrCacheConfig {
        &self.config
    }

    /// Deterministic key for a parameter set.
    pub fn generate_key(params: &BTreeMap<String, Value>) -> String {
        fingerprint::generate_key(params)
    }

    /// Read with metadata. Expired entries are marked stale and returned.
    pub fn get_entry(&self, key: &str) -> Option<CacheRead<T>> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired() {
            entry.stale = true;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        if entry.stale {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
        }
        Some(CacheRead::new(
            entry.data.clone(),
            entry.cached_at,
            entry.ttl,
            entry.stale,
        ))
    }

    /// Plain-value read: fresh or stale data, `None` only when absent.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_entry(key).map(CacheRead::into_value)
    }

    /// Store `data` with a freshness window in minutes.
    pub fn set(&self, key: &str, data: T, ttl_minutes: u64) {
        self.set_with_ttl(key, data, Duration::from_secs(ttl_minutes.saturating_mul(60)));
    }

    /// Store `data`, resetting its timestamp and stale flag.
    pub fn set_with_ttl(&self, key: &str, data: T, ttl: Duration) {
        if self.entries.len() > self.config.capacity {
            self.sweep();
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                cached_at: Utc::now(),
                inserted: Instant::now(),
                ttl,
                stale: false,
            },
        );
        self.listeners.notify(CacheEvent::Set {
            key: key.to_string(),
        });
    }

    /// Remove entries older than the hard max age.
    fn sweep(&self) -> usize {
        let before = self.entries.len();
        let max_age = self.config.max_age;
        self.entries
            .retain(|_, entry| entry.inserted.elapsed() <= max_age);
        let removed = before.saturating_sub(self.entries.len());

        debug!(
            removed,
            remaining = self.entries.len(),
            capacity = self.config.capacity,
            "SWR cache capacity sweep"
        );
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        self.listeners.notify(CacheEvent::Swept { removed });
        removed
    }

    /// True when the key is absent or its TTL has elapsed.
    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.stale || entry.is_expired())
            .unwrap_or(true)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        let removed = self.entries.remove(key).map(|(_, entry)| entry.data);
        if removed.is_some() {
            self.listeners.notify(CacheEvent::Removed {
                key: key.to_string(),
            });
        }
        removed
    }

    /// Drop every entry. Failure windows are kept.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        self.listeners.notify(CacheEvent::Cleared { count });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ========================================================================
    // FAILURE WINDOW
    // ========================================================================

    /// True when `domain` may be called under a window of `window_minutes`.
    pub fn check_circuit_breaker(
        &self,
        domain: &str,
        max_failures: u32,
        window_minutes: u64,
    ) -> bool {
        self.window.allow_with(
            domain,
            max_failures,
            Duration::from_secs(window_minutes.saturating_mul(60)),
        )
    }

    pub fn record_failure(&self, domain: &str) {
        let failures = self.window.record_failure(domain);
        debug!(domain = %domain, failures, "Upstream failure recorded");
    }

    pub fn window(&self) -> &WindowTracker {
        &self.window
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    pub fn subscribe(&self, listener: Arc<dyn CacheListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Snapshot of counters. Does not touch entry staleness.
    pub fn get_stats(&self) -> CacheStats {
        let total_entries = self.entries.len();
        let valid_entries = self
            .entries
            .iter()
            .filter(|entry| !entry.stale && !entry.is_expired())
            .count();
        CacheStats {
            total_entries,
            valid_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            by_domain_failure_counts: self.window.failure_counts(),
        }
    }
}

impl<T: Clone> Default for KeyedCache<T> {
    fn default() -> Self {
        Self::new(SwrCacheConfig::default())
    }
}

impl<T> std::fmt::Debug for KeyedCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
