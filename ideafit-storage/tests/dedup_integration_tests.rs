//! Integration Tests for the Deduplicating Fetch Cache
//!
//! Exercises `DedupCache` against the durable backends and the shared test
//! doubles: storage outages, LMDB persistence across instances, and the
//! progress protocol seen by joined callers.

use futures_util::future::{join_all, BoxFuture, FutureExt};
use ideafit_storage::{DedupCache, DurableStore, LmdbDurableStore};
use ideafit_test_utils::{
    DedupConfig, FailingDurableStore, IdeaFitError, IdeaFitResult, RecordingProgress,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn slow_value(
    calls: &Arc<AtomicUsize>,
    value: u32,
) -> impl FnOnce() -> BoxFuture<'static, IdeaFitResult<u32>> {
    let calls = Arc::clone(calls);
    move || {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(value)
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_storage_outage_never_fails_fetch() {
    let store = Arc::new(FailingDurableStore::new());
    let cache: DedupCache<u32> = DedupCache::new(store.clone(), DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let fetches = (0..10).map(|_| {
        let cache = cache.clone();
        let producer = slow_value(&calls, 7);
        async move {
            let progress = RecordingProgress::new();
            let result = cache.get_or_fetch("idea-x", producer, &progress).await;
            (result, progress.percentages())
        }
    });
    let results = join_all(fetches).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for (result, pcts) in results {
        assert_eq!(result, Ok(7));
        assert_eq!(pcts, vec![15, 100]);
    }
    // Ten failed reads plus one failed write
    assert_eq!(store.attempts(), 11);

    // Served from memory even though the store never accepted it
    let again = cache
        .get_or_fetch("idea-x", slow_value(&calls, 8), &RecordingProgress::new())
        .await;
    assert_eq!(again, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clear_all_survives_storage_outage() {
    let cache: DedupCache<u32> =
        DedupCache::new(Arc::new(FailingDurableStore::new()), DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .get_or_fetch("k", slow_value(&calls, 1), &RecordingProgress::new())
        .await
        .expect("fetch");

    assert_eq!(cache.clear_all().await, 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_lmdb_results_shared_across_instances() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let store: Arc<dyn DurableStore> =
        Arc::new(LmdbDurableStore::open(dir.path(), 10).expect("open"));
    let calls = Arc::new(AtomicUsize::new(0));

    let first: DedupCache<u32> = DedupCache::new(Arc::clone(&store), DedupConfig::default());
    let key = first.key_for("Uber for dogs", &Default::default());
    first
        .get_or_fetch(&key, slow_value(&calls, 42), &RecordingProgress::new())
        .await
        .expect("fetch");

    let second: DedupCache<u32> = DedupCache::new(Arc::clone(&store), DedupConfig::default());
    let progress = RecordingProgress::new();
    let value = second
        .get_or_fetch(&key, slow_value(&calls, 0), &progress)
        .await
        .expect("durable hit");

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(progress.percentages(), vec![100]);
}

#[tokio::test]
async fn test_failure_reaches_joined_callers_without_completion() {
    let cache: DedupCache<u32> = DedupCache::in_memory(DedupConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let fetches = (0..3).map(|_| {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        async move {
            let progress = RecordingProgress::new();
            let producer = move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<u32, _>(IdeaFitError::upstream("search", "timeout"))
                }
                .boxed()
            };
            let result = cache.get_or_fetch("k", producer, &progress).await;
            (result, progress.percentages())
        }
    });

    for (result, pcts) in join_all(fetches).await {
        assert_eq!(result, Err(IdeaFitError::upstream("search", "timeout")));
        assert_eq!(pcts, vec![15]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
}
