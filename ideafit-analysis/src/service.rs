//! Process-wide analysis service.
//!
//! One `AnalysisService` is built at startup and handed to every consumer.
//! It owns the deduplicating analysis cache, the SWR cache for auxiliary
//! lookups (search, trends, sentiment) and the breaker that guards the
//! producer.

use crate::orchestrator::AnalysisOrchestrator;
use crate::result::{AnalysisOutcome, AnalysisResult};
use ideafit_core::{
    AbortSignal, AnalysisPhase, IdeaFitError, IdeaFitResult, IdeaInput, MonotonicProgress,
    ProgressSink, ResilienceConfig,
};
use ideafit_llm::{AnalysisProducer, GuardedProducer};
use ideafit_resilience::{build_breaker, Breaker};
use ideafit_storage::cache::dedup::STARTED_NOTE;
use ideafit_storage::{CacheStats, DedupCache, DurableStore, KeyedCache, MemoryDurableStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// SWR READS
// ============================================================================

/// Where an SWR value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Cached and inside its TTL.
    Fresh,
    /// Cached past its TTL; a background refresh may be running.
    Stale,
    /// Fetched from upstream during this call.
    Refreshed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwrRead<T> {
    pub value: T,
    pub freshness: Freshness,
}

/// Removes a key from the refresh set when the refresh task ends.
struct RefreshGuard {
    refreshing: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Read-only snapshot for operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// SWR entries plus dedup entries.
    pub total_entries: usize,
    /// Entries still inside their TTL.
    pub valid_entries: usize,
    /// Analyses currently running.
    pub in_flight: usize,
    /// Failures per domain across the SWR window and the producer breaker.
    pub by_domain_failure_counts: HashMap<String, u32>,
    pub swr: CacheStats,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct AnalysisService {
    orchestrator: Arc<AnalysisOrchestrator>,
    analyses: DedupCache<AnalysisResult>,
    swr: Arc<KeyedCache<Value>>,
    breaker: Arc<dyn Breaker>,
    refreshing: Arc<Mutex<HashSet<String>>>,
    config: ResilienceConfig,
}

impl AnalysisService {
    /// Build the service around `producer`, persisting analyses into `store`.
    ///
    /// The producer is wrapped in a breaker of the configured strategy.
    pub fn new(
        producer: Arc<dyn AnalysisProducer>,
        store: Arc<dyn DurableStore>,
        config: ResilienceConfig,
    ) -> IdeaFitResult<Self> {
        config.validate()?;

        let breaker = build_breaker(&config);
        let guarded = GuardedProducer::new(producer, Arc::clone(&breaker));
        let service = Self {
            orchestrator: Arc::new(AnalysisOrchestrator::new(Arc::new(guarded))),
            analyses: DedupCache::new(store, config.dedup.clone()),
            swr: Arc::new(KeyedCache::new(config.cache.clone())),
            breaker,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            config,
        };

        info!(
            producer = %service.orchestrator.producer_id(),
            strategy = service.breaker.strategy().as_str(),
            namespace = %service.config.dedup.namespace,
            "Analysis service ready"
        );
        Ok(service)
    }

    /// Service persisting into an unbounded in-process store.
    pub fn in_memory(
        producer: Arc<dyn AnalysisProducer>,
        config: ResilienceConfig,
    ) -> IdeaFitResult<Self> {
        Self::new(producer, Arc::new(MemoryDurableStore::new()), config)
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<dyn Breaker> {
        &self.breaker
    }

    pub fn analyses(&self) -> &DedupCache<AnalysisResult> {
        &self.analyses
    }

    pub fn swr_cache(&self) -> &KeyedCache<Value> {
        &self.swr
    }

    fn refreshing(&self) -> MutexGuard<'_, HashSet<String>> {
        self.refreshing.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ========================================================================
    // ANALYSIS
    // ========================================================================

    /// Analyse `input`, sharing the run with any concurrent identical request.
    ///
    /// The caller that starts a run sees one checkpoint per orchestrator
    /// phase; a caller that joins it sees the cache's join checkpoint and
    /// completion. Progress is forced monotonic either way.
    ///
    /// A cancelled run is not cached. Only the starting caller's `abort` is
    /// consulted: a joined caller cannot cancel its own wait, and observes
    /// the starting caller's cancellation if there is one.
    pub async fn analyze(
        &self,
        input: IdeaInput,
        progress: Arc<dyn ProgressSink>,
        abort: Arc<dyn AbortSignal>,
    ) -> IdeaFitResult<AnalysisOutcome> {
        let key = self.analyses.key_for(&input.idea, &input.key_params());
        let progress = Arc::new(MonotonicProgress::new(progress));

        let orchestrator = Arc::clone(&self.orchestrator);
        let run_progress: Arc<dyn ProgressSink> = progress.clone();
        let producer = move || run_to_completion(orchestrator, input, run_progress, abort);

        // The orchestrator reports its own phases for a run it starts
        let cache_progress = |phase: &str, pct: u8, note: Option<&str>| {
            if note != Some(STARTED_NOTE) {
                progress.on_progress(phase, pct, note);
            }
        };

        match self
            .analyses
            .get_or_fetch(&key, producer, &cache_progress)
            .await
        {
            Ok(result) => Ok(AnalysisOutcome::Completed(result)),
            Err(IdeaFitError::Cancelled { phase }) => Ok(AnalysisOutcome::Cancelled {
                phase: AnalysisPhase::from_name(&phase).unwrap_or(AnalysisPhase::Validate),
                progress_pct: progress.high_water(),
            }),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // STALE-WHILE-REVALIDATE
    // ========================================================================

    fn swr_key(domain: &str, params: &BTreeMap<String, Value>) -> String {
        format!("{domain}:{}", KeyedCache::<Value>::generate_key(params))
    }

    fn window_allows(&self, domain: &str) -> bool {
        self.swr.window().allow_with(
            domain,
            self.config.window.max_failures,
            self.config.window.window,
        )
    }

    /// Serve `domain` lookups stale-while-revalidate.
    ///
    /// - fresh hit: returned as is
    /// - stale hit: returned immediately, one background refresh per key
    ///   unless the domain's failure window is blocking
    /// - miss: fetched inline; a blocked domain fails with `CircuitOpen`
    ///
    /// `ttl` of `None` stores with the cache's configured default TTL.
    /// Background refreshes need a Tokio runtime.
    pub async fn swr_fetch<T, F, Fut>(
        &self,
        domain: &str,
        params: &BTreeMap<String, Value>,
        ttl: Option<Duration>,
        fetcher: F,
    ) -> IdeaFitResult<SwrRead<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = IdeaFitResult<T>> + Send + 'static,
    {
        let key = Self::swr_key(domain, params);
        let ttl = ttl.unwrap_or(self.config.cache.default_ttl);

        if let Some(read) = self.swr.get_entry(&key) {
            let stale = read.is_stale();
            match serde_json::from_value::<T>(read.into_value()) {
                Ok(value) if !stale => {
                    return Ok(SwrRead {
                        value,
                        freshness: Freshness::Fresh,
                    })
                }
                Ok(value) => {
                    self.spawn_refresh(domain, key, ttl, fetcher);
                    return Ok(SwrRead {
                        value,
                        freshness: Freshness::Stale,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value has the wrong shape, refetching");
                }
            }
        }

        if !self.window_allows(domain) {
            debug!(domain = %domain, "Failure window blocking, upstream not called");
            return Err(IdeaFitError::circuit_open(domain));
        }

        match fetcher().await {
            Ok(value) => {
                store_value(&self.swr, &key, &value, ttl);
                Ok(SwrRead {
                    value,
                    freshness: Freshness::Refreshed,
                })
            }
            Err(e) => {
                self.swr.record_failure(domain);
                warn!(domain = %domain, error = %e, "SWR fetch failed");
                Err(e)
            }
        }
    }

    fn spawn_refresh<T, F, Fut>(&self, domain: &str, key: String, ttl: Duration, fetcher: F)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = IdeaFitResult<T>> + Send + 'static,
    {
        if !self.window_allows(domain) {
            debug!(domain = %domain, key = %key, "Failure window blocking, refresh skipped");
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %key, "No runtime, refresh skipped");
            return;
        };
        if !self.refreshing().insert(key.clone()) {
            debug!(key = %key, "Refresh already running");
            return;
        }

        let guard = RefreshGuard {
            refreshing: Arc::clone(&self.refreshing),
            key,
        };
        let swr = Arc::clone(&self.swr);
        let domain = domain.to_string();
        handle.spawn(async move {
            match fetcher().await {
                Ok(value) => {
                    store_value(&swr, &guard.key, &value, ttl);
                    debug!(key = %guard.key, "Background refresh stored");
                }
                Err(e) => {
                    swr.record_failure(&domain);
                    warn!(domain = %domain, error = %e, "Background refresh failed");
                }
            }
            drop(guard);
        });
    }

    /// Keys with a background refresh running.
    pub fn refreshing_count(&self) -> usize {
        self.refreshing().len()
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Snapshot of both caches and all failure counters. Mutates nothing.
    pub fn get_stats(&self) -> ServiceStats {
        let swr = self.swr.get_stats();
        let mut by_domain_failure_counts = swr.by_domain_failure_counts.clone();
        for (domain, failures) in self.breaker.failure_counts() {
            *by_domain_failure_counts.entry(domain).or_insert(0) += failures;
        }
        ServiceStats {
            total_entries: swr.total_entries + self.analyses.len(),
            valid_entries: swr.valid_entries + self.analyses.valid_count(),
            in_flight: self.analyses.in_flight_count(),
            by_domain_failure_counts,
            swr,
        }
    }

    /// Drop settled analyses older than the dedup TTL.
    pub fn purge_stale(&self) -> usize {
        self.analyses.purge_stale()
    }

    /// Drop every cached value in memory and in the durable namespace.
    ///
    /// Breaker state is left alone.
    pub async fn clear_all(&self) {
        let swr_entries = self.swr.len();
        self.swr.clear();
        let analyses = self.analyses.clear_all().await;
        info!(swr_entries, analyses, "All caches cleared");
    }
}

/// Run once for the dedup cache, turning cancellation into an error so the
/// outcome is never cached.
async fn run_to_completion(
    orchestrator: Arc<AnalysisOrchestrator>,
    input: IdeaInput,
    progress: Arc<dyn ProgressSink>,
    abort: Arc<dyn AbortSignal>,
) -> IdeaFitResult<AnalysisResult> {
    match orchestrator
        .run(input, progress.as_ref(), abort.as_ref())
        .await?
    {
        AnalysisOutcome::Completed(result) => Ok(result),
        AnalysisOutcome::Cancelled { phase, .. } => Err(IdeaFitError::Cancelled {
            phase: phase.as_str().to_string(),
        }),
    }
}

fn store_value<T: Serialize>(swr: &KeyedCache<Value>, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_value(value) {
        Ok(json) => swr.set_with_ttl(key, json, ttl),
        Err(e) => warn!(key = %key, error = %e, "Value not cacheable"),
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("orchestrator", &self.orchestrator)
            .field("analyses", &self.analyses)
            .field("swr", &self.swr)
            .field("strategy", &self.breaker.strategy())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ideafit_core::{NeverAbort, NoopProgress};
    use ideafit_llm::{ProducerRequest, RawAnalysis};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl AnalysisProducer for Echo {
        fn producer_id(&self) -> &str {
            "echo"
        }

        async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
            Ok(RawAnalysis {
                summary: Some(request.input.idea),
                ..Default::default()
            })
        }
    }

    fn service() -> AnalysisService {
        AnalysisService::in_memory(Arc::new(Echo), ResilienceConfig::default()).expect("service")
    }

    fn params(query: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([("q".to_string(), Value::from(query))])
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ResilienceConfig::default();
        config.dedup.namespace = " ".to_string();
        assert!(AnalysisService::in_memory(Arc::new(Echo), config).is_err());
    }

    #[tokio::test]
    async fn test_analyze_caches_by_normalized_idea() {
        let service = service();
        let first = service
            .analyze(IdeaInput::new("Pet Insurance"), Arc::new(NoopProgress), Arc::new(NeverAbort))
            .await
            .expect("analyze")
            .into_result()
            .expect("completed");
        let second = service
            .analyze(IdeaInput::new("  pet insurance"), Arc::new(NoopProgress), Arc::new(NeverAbort))
            .await
            .expect("analyze")
            .into_result()
            .expect("completed");
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(service.get_stats().valid_entries, 1);
    }

    #[tokio::test]
    async fn test_swr_fresh_then_stale_then_refreshed() {
        let service = service();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move { Ok::<_, IdeaFitError>(calls.fetch_add(1, Ordering::SeqCst) as u32) }
        };

        let miss = service
            .swr_fetch("search", &params("dogs"), Some(Duration::from_millis(30)), fetch(&calls))
            .await
            .expect("miss");
        assert_eq!(miss, SwrRead { value: 0, freshness: Freshness::Refreshed });

        let hit = service
            .swr_fetch("search", &params("dogs"), Some(Duration::from_millis(30)), fetch(&calls))
            .await
            .expect("hit");
        assert_eq!(hit, SwrRead { value: 0, freshness: Freshness::Fresh });

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stale = service
            .swr_fetch("search", &params("dogs"), Some(Duration::from_secs(60)), fetch(&calls))
            .await
            .expect("stale");
        assert_eq!(stale, SwrRead { value: 0, freshness: Freshness::Stale });

        // Let the background refresh land
        for _ in 0..50 {
            if service.refreshing_count() == 0 && calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let refreshed = service
            .swr_fetch("search", &params("dogs"), Some(Duration::from_secs(60)), fetch(&calls))
            .await
            .expect("refreshed");
        assert_eq!(refreshed, SwrRead { value: 1, freshness: Freshness::Fresh });
    }

    #[tokio::test]
    async fn test_swr_fetch_without_ttl_uses_configured_default() {
        let mut config = ResilienceConfig::default();
        config.cache = config.cache.with_default_ttl(Duration::from_millis(20));
        let service = AnalysisService::in_memory(Arc::new(Echo), config).expect("service");

        service
            .swr_fetch("trends", &params("ai"), None, || async { Ok::<_, IdeaFitError>(7u8) })
            .await
            .expect("miss");
        let key = AnalysisService::swr_key("trends", &params("ai"));
        let entry = service.swr_cache().get_entry(&key).expect("stored");
        assert_eq!(entry.ttl(), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(service.swr_cache().is_stale(&key));
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_caches() {
        let service = service();
        service
            .swr_fetch("search", &params("x"), None, || async { Ok::<_, IdeaFitError>(1u8) })
            .await
            .expect("fetch");
        service
            .analyze(IdeaInput::new("x"), Arc::new(NoopProgress), Arc::new(NeverAbort))
            .await
            .expect("analyze");
        assert_eq!(service.get_stats().total_entries, 2);

        service.clear_all().await;
        let stats = service.get_stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.in_flight, 0);
    }
}
