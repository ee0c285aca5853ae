//! IdeaFit Test Utilities
//!
//! Centralized test infrastructure for the IdeaFit workspace:
//! - Mock producers (scripted, flaky)
//! - A failing durable store for persistence-error paths
//! - A progress recorder
//! - Proptest generators for parameter maps and idea inputs
//! - Test fixtures and custom assertions

// Re-export core types for convenience
pub use ideafit_core::{
    CircuitBreakerConfig, CircuitError, CircuitState, DedupConfig, IdeaField, IdeaFitError,
    IdeaFitResult, IdeaInput, PersistenceError, ProgressSink, ResilienceConfig, SwrCacheConfig,
    UpstreamError, WindowConfig,
};
pub use ideafit_llm::{AnalysisProducer, ProducerRequest, RawAnalysis};
pub use ideafit_storage::{DurableStore, MemoryDurableStore};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// MOCK PRODUCERS
// ============================================================================

/// Producer that replays scripted responses, then a default one.
#[derive(Debug)]
pub struct MockAnalysisProducer {
    producer_id: String,
    script: Mutex<VecDeque<IdeaFitResult<RawAnalysis>>>,
    default_response: IdeaFitResult<RawAnalysis>,
    latency: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProducerRequest>>,
}

impl MockAnalysisProducer {
    /// Always succeeds with `payload`.
    pub fn new(producer_id: impl Into<String>, payload: RawAnalysis) -> Self {
        Self {
            producer_id: producer_id.into(),
            script: Mutex::new(VecDeque::new()),
            default_response: Ok(payload),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fails with a producer error.
    pub fn failing(producer_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let producer_id = producer_id.into();
        let error = IdeaFitError::upstream(producer_id.clone(), reason);
        Self {
            default_response: Err(error),
            ..Self::new(producer_id, RawAnalysis::default())
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response served before the default one.
    pub fn then(self, response: IdeaFitResult<RawAnalysis>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProducerRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl AnalysisProducer for MockAnalysisProducer {
    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| self.default_response.clone())
    }
}

/// Producer that fails a fixed number of times, then succeeds forever.
#[derive(Debug)]
pub struct FlakyProducer {
    producer_id: String,
    failures_left: AtomicUsize,
    payload: RawAnalysis,
    calls: AtomicUsize,
}

impl FlakyProducer {
    pub fn new(producer_id: impl Into<String>, failures: usize, payload: RawAnalysis) -> Self {
        Self {
            producer_id: producer_id.into(),
            failures_left: AtomicUsize::new(failures),
            payload,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProducer for FlakyProducer {
    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    async fn produce(&self, _request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(IdeaFitError::upstream(
                self.producer_id.clone(),
                format!("flaky failure on call {call}"),
            ))
        } else {
            Ok(self.payload.clone())
        }
    }
}

// ============================================================================
// FAILING DURABLE STORE
// ============================================================================

/// Durable store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingDurableStore {
    attempts: AtomicUsize,
}

impl FailingDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self, key: &str) -> PersistenceError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        PersistenceError::WriteFailed {
            key: key.to_string(),
            reason: "storage unavailable".to_string(),
        }
    }
}

#[async_trait]
impl DurableStore for FailingDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::ReadFailed {
            key: key.to_string(),
            reason: "storage unavailable".to_string(),
        })
    }

    async fn set(&self, key: &str, _value: String) -> Result<(), PersistenceError> {
        Err(self.fail(key))
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        Err(self.fail(key))
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, PersistenceError> {
        Err(self.fail(prefix))
    }
}

// ============================================================================
// PROGRESS RECORDER
// ============================================================================

/// A single captured progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: String,
    pub pct: u8,
    pub note: Option<String>,
}

/// Progress sink that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn percentages(&self) -> Vec<u8> {
        self.events().into_iter().map(|e| e.pct).collect()
    }

    pub fn phases(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.phase).collect()
    }

    /// True when no recorded percentage is lower than the one before it.
    pub fn is_monotonic(&self) -> bool {
        self.percentages().windows(2).all(|w| w[0] <= w[1])
    }
}

impl ProgressSink for RecordingProgress {
    fn on_progress(&self, phase: &str, pct: u8, note: Option<&str>) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ProgressEvent {
                phase: phase.to_string(),
                pct,
                note: note.map(str::to_string),
            });
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for request parameters and idea inputs.

    use super::*;
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::BTreeMap;

    /// A JSON scalar parameter value.
    pub fn arb_param_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,40}".prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    /// A parameter map with identifier-like names.
    pub fn arb_param_map() -> impl Strategy<Value = BTreeMap<String, Value>> {
        btree_map("[a-z][a-z0-9_]{0,11}", arb_param_value(), 0..8)
    }

    /// Text that passes the specificity heuristic: carries a digit.
    pub fn arb_specific_text() -> impl Strategy<Value = String> {
        ("[a-z]{3,10}( [a-z]{2,8}){0,8}", 1u32..10_000)
            .prop_map(|(words, n)| format!("{words} {n}"))
    }

    /// Text that reads as vague: a few words, no digits or currency.
    pub fn arb_vague_text() -> impl Strategy<Value = String> {
        vec("[a-z]{2,9}", 1..=6).prop_map(|words| words.join(" "))
    }

    /// Empty or whitespace-only text.
    pub fn arb_blank_text() -> impl Strategy<Value = String> {
        "[ \t]{0,4}"
    }

    /// Any of the three kinds of field text.
    pub fn arb_field_text() -> impl Strategy<Value = String> {
        prop_oneof![arb_specific_text(), arb_vague_text(), arb_blank_text()]
    }

    pub fn arb_idea_input() -> impl Strategy<Value = IdeaInput> {
        (
            "[A-Za-z ]{1,40}",
            vec(arb_field_text(), IdeaField::ALL.len()),
            arb_param_map(),
        )
            .prop_map(|(idea, texts, params)| {
                let mut input = IdeaInput::new(idea);
                for (field, text) in IdeaField::ALL.into_iter().zip(texts) {
                    input = input.with_field(field, text);
                }
                input.params = params;
                input
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built inputs and payloads for common scenarios.

    use super::*;

    /// An idea whose every field is specific.
    pub fn specific_idea() -> IdeaInput {
        IdeaInput::new("Onboarding copilot for B2B SaaS")
            .with_field(
                IdeaField::Problem,
                "Enterprise onboarding takes 45 days on average",
            )
            .with_field(
                IdeaField::TargetUser,
                "Customer success teams at 200-person SaaS companies",
            )
            .with_field(
                IdeaField::Solution,
                "Guided setup that cuts onboarding to 10 days",
            )
            .with_field(IdeaField::BusinessModel, "$400 per seat per year")
            .with_field(IdeaField::Competitors, "WalkMe, Pendo, 3 smaller vendors")
            .with_field(
                IdeaField::Differentiation,
                "Integrates with 12 CRMs out of the box",
            )
    }

    /// A complete producer payload.
    pub fn full_payload() -> RawAnalysis {
        RawAnalysis {
            summary: Some("Strong demand, crowded market".to_string()),
            fit_score: Some(74.0),
            market_demand: Some(81.0),
            competition: Some(63.0),
            feasibility: Some(70.0),
            strengths: Some(vec!["clear buyer".to_string()]),
            risks: Some(vec!["long sales cycle".to_string()]),
            competitors: Some(vec!["WalkMe".to_string(), "Pendo".to_string()]),
            recommendations: Some(vec!["start with one CRM".to_string()]),
        }
    }

    /// Breaker settings small enough for fast tests.
    pub fn fast_resilience(max_failures: u32, reset_timeout: Duration) -> ResilienceConfig {
        let mut config = ResilienceConfig::default();
        config.circuit = CircuitBreakerConfig::new(max_failures, reset_timeout);
        config.window = WindowConfig::new(max_failures, reset_timeout);
        config
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for IdeaFit error variants.

    use super::*;

    /// Assert that a result is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &IdeaFitResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a result is a circuit-open rejection for `domain`.
    #[track_caller]
    pub fn assert_circuit_open<T: std::fmt::Debug>(result: &IdeaFitResult<T>, domain: &str) {
        match result {
            Err(IdeaFitError::Circuit(CircuitError::Open { domain: d })) => {
                assert_eq!(d, domain, "Wrong domain in CircuitOpen error");
            }
            other => panic!("Expected CircuitOpen for {domain}, got: {:?}", other),
        }
    }

    /// Assert that a result is an upstream failure.
    #[track_caller]
    pub fn assert_upstream_error<T: std::fmt::Debug>(result: &IdeaFitResult<T>) {
        match result {
            Err(IdeaFitError::Upstream(_)) => {}
            other => panic!("Expected Upstream error, got: {:?}", other),
        }
    }

    /// Assert that recorded percentages never decrease and end at 100.
    #[track_caller]
    pub fn assert_progress_complete(progress: &RecordingProgress) {
        let pcts = progress.percentages();
        assert!(progress.is_monotonic(), "Progress went backwards: {:?}", pcts);
        assert_eq!(pcts.last(), Some(&100), "Progress did not finish: {:?}", pcts);
        assert_eq!(
            pcts.iter().filter(|&&p| p == 100).count(),
            1,
            "100% reported more than once: {:?}",
            pcts
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_flaky_producer_fails_then_succeeds() {
        let producer = FlakyProducer::new("model", 2, fixtures::full_payload());
        let request = || ProducerRequest::new(ideafit_core::new_run_id(), IdeaInput::new("x"));

        assert!(producer.produce(request()).await.is_err());
        assert!(producer.produce(request()).await.is_err());
        assert_eq!(
            producer.produce(request()).await.expect("third call"),
            fixtures::full_payload()
        );
        assert_eq!(producer.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_producer_replays_script() {
        let producer = MockAnalysisProducer::new("model", fixtures::full_payload())
            .then(Err(IdeaFitError::upstream("model", "429")));
        let request = || ProducerRequest::new(ideafit_core::new_run_id(), IdeaInput::new("x"));

        assertions::assert_upstream_error(&producer.produce(request()).await);
        assertions::assert_ok(&producer.produce(request()).await);
        assert_eq!(producer.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_store_counts_attempts() {
        let store = FailingDurableStore::new();
        assert!(store.get("k").await.is_err());
        assert!(store.set("k", "v".to_string()).await.is_err());
        assert_eq!(store.attempts(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_vague_text_has_no_digits(text in generators::arb_vague_text()) {
            prop_assert!(!text.chars().any(|c| c.is_ascii_digit()));
            prop_assert!(text.split_whitespace().count() <= 6);
        }

        #[test]
        fn prop_generated_specific_text_has_digit(text in generators::arb_specific_text()) {
            prop_assert!(text.chars().any(|c| c.is_ascii_digit()));
        }

        #[test]
        fn prop_generated_idea_sets_every_field(input in generators::arb_idea_input()) {
            // Fields may be blank, but params must be carried over
            prop_assert!(input.params.len() < 8);
            prop_assert!(!input.idea.is_empty());
        }
    }
}
