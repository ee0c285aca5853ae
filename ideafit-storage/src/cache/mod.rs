//! Cache layer for upstream results.
//!
//! Two caches with different jobs:
//!
//! - [`KeyedCache`] serves stale-while-revalidate reads. Entries past their
//!   TTL are flagged stale but still returned; only capacity sweeps and
//!   explicit removal drop them.
//! - [`DedupCache`] coalesces concurrent fetches for the same key into one
//!   producer call and persists settled results through a [`DurableStore`].
//!
//! Both notify [`CacheListener`]s synchronously after every mutation.
//!
//! # Example
//!
//! ```ignore
//! let cache = KeyedCache::<Quote>::new(SwrCacheConfig::default());
//! let key = KeyedCache::<Quote>::generate_key(&params);
//!
//! if let Some(read) = cache.get_entry(&key) {
//!     if read.is_stale() {
//!         // caller decides whether to refresh in the background
//!     }
//!     return Ok(read.into_value());
//! }
//! ```

pub mod dedup;
pub mod durable;
pub mod lmdb_backend;
pub mod memory;
pub mod read;
pub mod stats;
pub mod subscription;
pub mod swr;

pub use dedup::DedupCache;
pub use durable::{DurableRecord, DurableStore};
pub use lmdb_backend::{LmdbDurableStore, LmdbStoreError};
pub use memory::MemoryDurableStore;
pub use read::CacheRead;
pub use stats::CacheStats;
pub use subscription::{CacheEvent, CacheListener, ListenerSet, Subscription};
pub use swr::KeyedCache;
