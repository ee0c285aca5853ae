//! IdeaFit Storage - Caching and Persistence
//!
//! The stale-while-revalidate keyed cache, the deduplicating fetch cache and
//! the durable stores they persist into.

pub mod cache;

// Re-export cache types for the analysis service
pub use cache::{
    CacheEvent, CacheListener, CacheRead, CacheStats, DedupCache, DurableRecord, DurableStore,
    KeyedCache, ListenerSet, LmdbDurableStore, LmdbStoreError, MemoryDurableStore, Subscription,
};
