//! Deduplicating fetch cache.
//!
//! Concurrent `get_or_fetch` calls for one key share a single producer
//! invocation. The producer future is wrapped in a [`Shared`] handle that is
//! published in the entry map before anyone awaits it, so every caller that
//! arrives while it is outstanding joins the same result or the same error.
//!
//! Lookup order:
//! 1. durable store (fresh record ⇒ no producer call, progress 100)
//! 2. settled in-memory result inside its TTL
//! 3. outstanding in-flight future (join it)
//! 4. start a new producer call
//!
//! Settlement runs inside the shared future itself, so it happens exactly
//! once per producer call regardless of how many callers are waiting.
//! Successes are persisted best-effort; failures drop the entry so the next
//! call retries instead of replaying the error.

use super::durable::{DurableRecord, DurableStore};
use super::memory::MemoryDurableStore;
use super::subscription::{CacheEvent, CacheListener, ListenerSet, Subscription};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use ideafit_core::constants::{DEDUP_PROGRESS_STARTED, PROGRESS_COMPLETE};
use ideafit_core::{fingerprint, DedupConfig, IdeaFitResult, ProgressSink};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Phase label used for progress events emitted by the cache.
pub const FETCH_PHASE: &str = "fetch";

/// Note on the checkpoint reported to the caller that starts a producer call.
pub const STARTED_NOTE: &str = "started";

type SharedFetch<T> = Shared<BoxFuture<'static, IdeaFitResult<T>>>;

struct DedupEntry<T> {
    in_flight: Option<SharedFetch<T>>,
    settled: Option<T>,
    created_at: Instant,
    /// Distinguishes this producer call from any later one for the same key.
    generation: u64,
}

struct DedupInner<T> {
    entries: Mutex<HashMap<String, DedupEntry<T>>>,
    store: Arc<dyn DurableStore>,
    config: DedupConfig,
    listeners: ListenerSet,
    next_generation: AtomicU64,
}

enum Lookup<T> {
    Settled(T),
    Join(SharedFetch<T>),
    Start(SharedFetch<T>),
}

/// In-flight coalescing cache with durable persistence.
///
/// Cloning is cheap and clones share state.
pub struct DedupCache<T> {
    inner: Arc<DedupInner<T>>,
}

impl<T> Clone for DedupCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DedupInner<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn entries(&self) -> MutexGuard<'_, HashMap<String, DedupEntry<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}{}", self.config.namespace, key)
    }

    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.entries()
            .get(key)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false)
    }

    async fn read_durable(&self, key: &str) -> Option<T> {
        let durable_key = self.durable_key(key);
        let raw = match self.store.get(&durable_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %durable_key, error = %e, "Durable read failed, treating as miss");
                return None;
            }
        };

        match DurableRecord::<T>::decode(&durable_key, &raw) {
            Ok(record) if record.is_fresh(self.config.ttl) => Some(record.data),
            Ok(_) => {
                debug!(key = %durable_key, "Durable record expired");
                None
            }
            Err(e) => {
                warn!(key = %durable_key, error = %e, "Ignoring unreadable durable record");
                None
            }
        }
    }

    /// Best-effort write. Returns whether the record landed.
    async fn persist(&self, key: &str, data: &T) -> bool {
        let durable_key = self.durable_key(key);
        let write = match DurableRecord::new(data).encode(&durable_key) {
            Ok(raw) => self.store.set(&durable_key, raw).await,
            Err(e) => Err(e),
        };
        match write {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %durable_key, error = %e, "Durable write failed, result kept in memory only");
                false
            }
        }
    }

    async fn settle(&self, key: &str, generation: u64, result: &IdeaFitResult<T>) {
        if !self.is_current(key, generation) {
            // Entry was cleared or invalidated while the producer ran
            debug!(key = %key, "Discarding result of superseded fetch");
            return;
        }

        match result {
            Ok(data) => {
                let persisted = self.persist(key, data).await;
                {
                    let mut entries = self.entries();
                    if let Some(entry) = entries.get_mut(key) {
                        if entry.generation == generation {
                            entry.in_flight = None;
                            entry.settled = Some(data.clone());
                            entry.created_at = Instant::now();
                        }
                    }
                }
                if persisted {
                    self.listeners.notify(CacheEvent::Persisted {
                        key: key.to_string(),
                    });
                }
            }
            Err(e) => {
                {
                    let mut entries = self.entries();
                    if entries
                        .get(key)
                        .map(|entry| entry.generation == generation)
                        .unwrap_or(false)
                    {
                        entries.remove(key);
                    }
                }
                if e.is_cancelled() {
                    debug!(key = %key, "Fetch cancelled, entry dropped");
                } else {
                    warn!(key = %key, error = %e, "Fetch failed, entry dropped for retry");
                }
                self.listeners.notify(CacheEvent::Removed {
                    key: key.to_string(),
                });
            }
        }
    }
}

impl<T> DedupCache<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    pub fn new(store: Arc<dyn DurableStore>, config: DedupConfig) -> Self {
        Self {
            inner: Arc::new(DedupInner {
                entries: Mutex::new(HashMap::new()),
                store,
                config,
                listeners: ListenerSet::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Cache backed by an unbounded [`MemoryDurableStore`].
    pub fn in_memory(config: DedupConfig) -> Self {
        Self::new(Arc::new(MemoryDurableStore::new()), config)
    }

    pub fn config(&self) -> &DedupConfig {
        &self.inner.config
    }

    /// Request key for an idea plus its parameters.
    pub fn key_for(&self, idea: &str, params: &BTreeMap<String, Value>) -> String {
        fingerprint::request_key(idea, params, self.inner.config.max_value_len)
    }

    /// Return the cached value for `key`, or run `producer` at most once
    /// across all concurrent callers.
    ///
    /// `producer` is called while the entry map is locked; it must only build
    /// the future and must not call back into this cache synchronously.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        producer: F,
        progress: &dyn ProgressSink,
    ) -> IdeaFitResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IdeaFitResult<T>> + Send + 'static,
    {
        if let Some(data) = self.inner.read_durable(key).await {
            debug!(key = %key, "Durable cache hit");
            progress.on_progress(FETCH_PHASE, PROGRESS_COMPLETE, Some("cached"));
            return Ok(data);
        }

        let lookup = {
            let mut entries = self.inner.entries();
            let existing = match entries.get(key) {
                Some(DedupEntry {
                    in_flight: Some(shared),
                    ..
                }) => Some(Lookup::Join(shared.clone())),
                Some(DedupEntry {
                    settled: Some(data),
                    created_at,
                    ..
                }) if created_at.elapsed() < self.inner.config.ttl => {
                    Some(Lookup::Settled(data.clone()))
                }
                _ => None,
            };
            match existing {
                Some(lookup) => lookup,
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.wrap(key, generation, producer());
                    entries.insert(
                        key.to_string(),
                        DedupEntry {
                            in_flight: Some(shared.clone()),
                            settled: None,
                            created_at: Instant::now(),
                            generation,
                        },
                    );
                    Lookup::Start(shared)
                }
            }
        };

        let shared = match lookup {
            Lookup::Settled(data) => {
                debug!(key = %key, "Memory cache hit");
                progress.on_progress(FETCH_PHASE, PROGRESS_COMPLETE, Some("cached"));
                return Ok(data);
            }
            Lookup::Join(shared) => {
                debug!(key = %key, "Joining in-flight fetch");
                progress.on_progress(FETCH_PHASE, DEDUP_PROGRESS_STARTED, Some("joined"));
                shared
            }
            Lookup::Start(shared) => {
                debug!(key = %key, "Starting fetch");
                progress.on_progress(
                    FETCH_PHASE,
                    DEDUP_PROGRESS_STARTED,
                    Some(STARTED_NOTE),
                );
                shared
            }
        };

        let result = shared.await;
        if result.is_ok() {
            progress.on_progress(FETCH_PHASE, PROGRESS_COMPLETE, None);
        }
        result
    }

    fn wrap<Fut>(&self, key: &str, generation: u64, fetch: Fut) -> SharedFetch<T>
    where
        Fut: Future<Output = IdeaFitResult<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        async move {
            let result = fetch.await;
            inner.settle(&key, generation, &result).await;
            result
        }
        .boxed()
        .shared()
    }

    /// Drop settled entries older than the TTL. In-flight entries are kept.
    pub fn purge_stale(&self) -> usize {
        let ttl = self.inner.config.ttl;
        let removed = {
            let mut entries = self.inner.entries();
            let before = entries.len();
            entries.retain(|_, entry| entry.in_flight.is_some() || entry.created_at.elapsed() < ttl);
            before - entries.len()
        };
        if removed > 0 {
            debug!(removed, "Purged stale dedup entries");
            self.inner
                .listeners
                .notify(CacheEvent::Purged { removed });
        }
        removed
    }

    /// Forget `key` in memory and in the durable store.
    pub async fn invalidate(&self, key: &str) {
        let removed = self.inner.entries().remove(key).is_some();
        let durable_key = self.inner.durable_key(key);
        if let Err(e) = self.inner.store.remove(&durable_key).await {
            warn!(key = %durable_key, error = %e, "Durable remove failed");
        }
        if removed {
            self.inner.listeners.notify(CacheEvent::Removed {
                key: key.to_string(),
            });
        }
    }

    /// Drop every in-memory entry and every durable record in the namespace.
    ///
    /// Producers already running finish, but their results are discarded.
    pub async fn clear_all(&self) -> usize {
        let count = {
            let mut entries = self.inner.entries();
            let count = entries.len();
            entries.clear();
            count
        };
        match self
            .inner
            .store
            .remove_prefix(&self.inner.config.namespace)
            .await
        {
            Ok(removed) => debug!(removed, "Cleared durable dedup records"),
            Err(e) => warn!(error = %e, "Failed to clear durable dedup records"),
        }
        self.inner.listeners.notify(CacheEvent::Cleared { count });
        count
    }

    /// Entries in memory, settled or in flight.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner
            .entries()
            .values()
            .filter(|entry| entry.in_flight.is_some())
            .count()
    }

    /// Settled entries still inside their TTL.
    pub fn valid_count(&self) -> usize {
        let ttl = self.inner.config.ttl;
        self.inner
            .entries()
            .values()
            .filter(|entry| entry.settled.is_some() && entry.created_at.elapsed() < ttl)
            .count()
    }

    pub fn subscribe(&self, listener: Arc<dyn CacheListener>) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }
}

impl<T> std::fmt::Debug for DedupCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache")
            .field("namespace", &self.inner.config.namespace)
            .field("ttl", &self.inner.config.ttl)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ideafit_core::{IdeaFitError, NoopProgress};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cache() -> (DedupCache<String>, Arc<MemoryDurableStore>) {
        let store = Arc::new(MemoryDurableStore::new());
        let cache = DedupCache::new(store.clone(), DedupConfig::default());
        (cache, store)
    }

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &str,
        delay_ms: u64,
    ) -> impl FnOnce() -> BoxFuture<'static, IdeaFitResult<String>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    fn failing_producer(
        calls: &Arc<AtomicUsize>,
        delay_ms: u64,
    ) -> impl FnOnce() -> BoxFuture<'static, IdeaFitResult<String>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(IdeaFitError::upstream("model", "503"))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_producer_call() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetches = (0..10).map(|_| {
            let cache = cache.clone();
            let producer = counting_producer(&calls, "result", 50);
            async move { cache.get_or_fetch("idea-x", producer, &NoopProgress).await }
        });
        let results = futures_util::future::join_all(fetches).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("result")));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetches = (0..5).map(|_| {
            let cache = cache.clone();
            let producer = failing_producer(&calls, 30);
            async move { cache.get_or_fetch("idea-x", producer, &NoopProgress).await }
        });
        let results = futures_util::future::join_all(fetches).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let expected = Err(IdeaFitError::upstream("model", "503"));
        assert!(results.iter().all(|r| *r == expected));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_fetch("k", failing_producer(&calls, 0), &NoopProgress)
            .await;
        assert!(first.is_err());
        assert!(cache.is_empty());

        let second = cache
            .get_or_fetch("k", counting_producer(&calls, "ok", 0), &NoopProgress)
            .await;
        assert_eq!(second.as_deref(), Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_is_persisted_and_served_from_durable() {
        let (cache, store) = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("k", counting_producer(&calls, "v", 0), &NoopProgress)
            .await
            .expect("fetch");
        let raw = store
            .get("ideafit:analysis:k")
            .await
            .expect("get")
            .expect("persisted");
        let record: DurableRecord<String> = DurableRecord::decode("k", &raw).expect("decode");
        assert_eq!(record.data, "v");

        // A fresh cache over the same store never calls the producer
        let reloaded: DedupCache<String> = DedupCache::new(store.clone(), DedupConfig::default());
        let progress = Mutex::new(Vec::new());
        let sink = |phase: &str, pct: u8, _note: Option<&str>| {
            progress.lock().expect("lock").push((phase.to_string(), pct));
        };
        let value = reloaded
            .get_or_fetch("k", counting_producer(&calls, "other", 0), &sink)
            .await
            .expect("durable hit");
        assert_eq!(value, "v");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *progress.lock().expect("lock"),
            vec![(FETCH_PHASE.to_string(), PROGRESS_COMPLETE)]
        );
    }

    #[tokio::test]
    async fn test_expired_durable_record_is_ignored() {
        let (cache, store) = cache();
        let stale = DurableRecord::with_timestamp("old".to_string(), ideafit_core::now_millis() - 601_000);
        store
            .set("ideafit:analysis:k", stale.encode("k").expect("encode"))
            .await
            .expect("set");

        let calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .get_or_fetch("k", counting_producer(&calls, "new", 0), &NoopProgress)
            .await
            .expect("fetch");
        assert_eq!(value, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_fetch() {
        let store = Arc::new(MemoryDurableStore::with_quota(0));
        let cache: DedupCache<String> = DedupCache::new(store.clone(), DedupConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache
            .get_or_fetch("k", counting_producer(&calls, "v", 0), &NoopProgress)
            .await;
        assert_eq!(value.as_deref(), Ok("v"));
        assert!(store.is_empty());

        // Still served from memory
        let again = cache
            .get_or_fetch("k", counting_producer(&calls, "other", 0), &NoopProgress)
            .await;
        assert_eq!(again.as_deref(), Ok("v"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_checkpoints_for_fresh_fetch() {
        let (cache, _) = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let progress = Mutex::new(Vec::new());
        let sink = |_: &str, pct: u8, _: Option<&str>| progress.lock().expect("lock").push(pct);

        cache
            .get_or_fetch("k", counting_producer(&calls, "v", 0), &sink)
            .await
            .expect("fetch");
        assert_eq!(
            *progress.lock().expect("lock"),
            vec![DEDUP_PROGRESS_STARTED, PROGRESS_COMPLETE]
        );
    }

    #[tokio::test]
    async fn test_purge_stale_keeps_in_flight_entries() {
        let store = Arc::new(MemoryDurableStore::new());
        let config = DedupConfig::default().with_ttl(Duration::from_millis(20));
        let cache: DedupCache<String> = DedupCache::new(store, config);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("settled", counting_producer(&calls, "v", 0), &NoopProgress)
            .await
            .expect("fetch");

        let slow = {
            let cache = cache.clone();
            let producer = counting_producer(&calls, "slow", 200);
            tokio::spawn(async move { cache.get_or_fetch("slow", producer, &NoopProgress).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.in_flight_count(), 1);
        assert_eq!(cache.purge_stale(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.in_flight_count(), 1);

        let slow = slow.await.expect("join");
        assert_eq!(slow.as_deref(), Ok("slow"));
    }

    #[tokio::test]
    async fn test_clear_all_drops_namespace_only() {
        let (cache, store) = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .set("unrelated:key", "keep".to_string())
            .await
            .expect("set");
        cache
            .get_or_fetch("k", counting_producer(&calls, "v", 0), &NoopProgress)
            .await
            .expect("fetch");

        assert_eq!(cache.clear_all().await, 1);
        assert!(cache.is_empty());
        assert_eq!(store.keys(), ["unrelated:key"]);

        cache
            .get_or_fetch("k", counting_producer(&calls, "v2", 0), &NoopProgress)
            .await
            .expect("refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_discards_result() {
        let (cache, store) = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let pending = {
            let cache = cache.clone();
            let producer = counting_producer(&calls, "late", 50);
            tokio::spawn(async move { cache.get_or_fetch("k", producer, &NoopProgress).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear_all().await;

        // The waiting caller still gets its value
        assert_eq!(pending.await.expect("join").as_deref(), Ok("late"));
        assert!(cache.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_key_for_normalizes_idea() {
        let (cache, _) = cache();
        let params = BTreeMap::new();
        assert_eq!(
            cache.key_for("  Uber for DOGS", &params),
            cache.key_for("uber for dogs", &params)
        );
    }

    #[tokio::test]
    async fn test_listener_sees_persisted_event() {
        let (cache, _) = cache();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _subscription = cache.subscribe(Arc::new(move |event: &CacheEvent| {
            sink.lock().expect("lock").push(event.clone());
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get_or_fetch("k", counting_producer(&calls, "v", 0), &NoopProgress)
            .await
            .expect("fetch");

        assert_eq!(
            *events.lock().expect("lock"),
            vec![CacheEvent::Persisted {
                key: "k".to_string()
            }]
        );
    }
}
