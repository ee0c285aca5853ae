//! Three-state circuit breaker.
//!
//! `CLOSED --(failures >= max)--> OPEN --(reset timeout)--> HALF_OPEN`,
//! then `HALF_OPEN --(success)--> CLOSED` or `HALF_OPEN --(failure)--> OPEN`.
//! Only one probe is admitted while half-open; concurrent callers are
//! rejected exactly as if the circuit were open.

use chrono::Utc;
use ideafit_core::{CircuitBreakerConfig, CircuitError, CircuitState, IdeaFitError, Timestamp};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS
// ============================================================================

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError<E> {
    /// The operation was not invoked.
    #[error("Circuit open for {domain}")]
    Open { domain: String },

    /// The operation ran and failed; the failure has been recorded.
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl From<BreakerError<IdeaFitError>> for IdeaFitError {
    fn from(err: BreakerError<IdeaFitError>) -> Self {
        match err {
            BreakerError::Open { domain } => IdeaFitError::Circuit(CircuitError::Open { domain }),
            BreakerError::Operation(e) => e,
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Point-in-time view of a breaker, for stats endpoints and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Timestamp>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_failure_wall: Option<Timestamp>,
    /// Set while the half-open probe is outstanding.
    probe_started_at: Option<Instant>,
}

/// Circuit breaker for a single named dependency.
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    counters: Mutex<Counters>,
    config: CircuitBreakerConfig,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            domain = %name,
            max_failures = config.max_failures,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            counters: Mutex::new(Counters::default()),
            config,
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.counters().consecutive_failures
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Admission check. Returns false when the call must not reach the upstream.
    ///
    /// An open circuit whose reset timeout has elapsed moves to half-open and
    /// admits this caller as the probe. A probe that never reports back is
    /// abandoned after another reset timeout so the circuit can't wedge.
    pub fn allow(&self) -> bool {
        let mut counters = self.counters();
        let allowed = match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = counters
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.set_state(CircuitState::HalfOpen);
                    counters.probe_started_at = Some(Instant::now());
                    info!(domain = %self.name, "Circuit breaker half-open (probing)");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match counters.probe_started_at {
                Some(started) if started.elapsed() < self.config.reset_timeout => false,
                _ => {
                    counters.probe_started_at = Some(Instant::now());
                    true
                }
            },
        };
        drop(counters);

        if allowed {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(domain = %self.name, state = %self.state(), "Circuit breaker rejected call");
        }
        allowed
    }

    pub fn record_success(&self) {
        let mut counters = self.counters();
        match self.state() {
            CircuitState::HalfOpen => {
                counters.consecutive_failures = 0;
                counters.probe_started_at = None;
                self.set_state(CircuitState::Closed);
                info!(domain = %self.name, "Circuit breaker closed (recovered)");
            }
            CircuitState::Closed => {
                counters.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // Late result from a call admitted before the circuit opened
                debug!(domain = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut counters = self.counters();
        counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
        counters.last_failure_at = Some(Instant::now());
        counters.last_failure_wall = Some(Utc::now());

        match self.state() {
            CircuitState::HalfOpen => {
                counters.probe_started_at = None;
                self.set_state(CircuitState::Open);
                warn!(
                    domain = %self.name,
                    failures = counters.consecutive_failures,
                    "Circuit breaker reopened (probe failed)"
                );
            }
            CircuitState::Closed if counters.consecutive_failures >= self.config.max_failures => {
                self.set_state(CircuitState::Open);
                warn!(
                    domain = %self.name,
                    failures = counters.consecutive_failures,
                    max_failures = self.config.max_failures,
                    reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Run `operation` under the breaker.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(BreakerError::Open {
                domain: self.name.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Run `operation` under the breaker, substituting `fallback()` for any
    /// rejection or failure.
    pub async fn execute_with_fallback<T, E, F, Fut, G>(&self, operation: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> T,
        E: std::fmt::Display,
    {
        match self.execute(operation).await {
            Ok(value) => value,
            Err(BreakerError::Open { .. }) => fallback(),
            Err(BreakerError::Operation(e)) => {
                warn!(domain = %self.name, error = %e, "Operation failed, using fallback");
                fallback()
            }
        }
    }

    /// Clear counters and force CLOSED regardless of timers.
    pub fn reset(&self) {
        let mut counters = self.counters();
        *counters = Counters::default();
        self.set_state(CircuitState::Closed);
        info!(domain = %self.name, "Circuit breaker reset");
    }

    /// Operator override: open now, starting a fresh reset timeout.
    pub fn force_open(&self) {
        let mut counters = self.counters();
        counters.last_failure_at = Some(Instant::now());
        counters.last_failure_wall = Some(Utc::now());
        counters.probe_started_at = None;
        self.set_state(CircuitState::Open);
        warn!(domain = %self.name, "Circuit breaker forced open");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let counters = self.counters();
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.state(),
            consecutive_failures: counters.consecutive_failures,
            last_failure_at: counters.last_failure_wall,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn breaker(max_failures: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "model",
            CircuitBreakerConfig::new(max_failures, Duration::from_millis(reset_ms)),
        )
    }

    async fn fail() -> Result<u32, String> {
        Err("boom".to_string())
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(5, 1000);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
        assert_eq!(cb.snapshot().rejected_calls, 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_operation() {
        let cb = breaker(1, 60_000);
        let _ = cb.execute(fail).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(1)
            })
            .await;
        assert_eq!(
            result,
            Err(BreakerError::Open {
                domain: "model".to_string()
            })
        );
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 20);
        let _ = cb.execute(fail).await;
        let _ = cb.execute(fail).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let value = cb.execute(|| async { Ok::<_, String>(7) }).await;
        assert_eq!(value, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_below_threshold() {
        let cb = breaker(5, 20);
        cb.force_open();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let result = cb.execute(fail).await;
        assert!(matches!(result, Err(BreakerError::Operation(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.consecutive_failures() < 5);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let cb = breaker(1, 20);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(40));

        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_abandoned_probe_expires() {
        let cb = breaker(1, 20);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.allow());
        assert!(!cb.allow());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.allow());
    }

    #[tokio::test]
    async fn test_fallback_on_failure_and_rejection() {
        let cb = breaker(1, 60_000);
        let first = cb.execute_with_fallback(fail, || 99).await;
        assert_eq!(first, 99);
        assert_eq!(cb.state(), CircuitState::Open);

        let second = cb
            .execute_with_fallback(|| async { Ok::<_, String>(1) }, || 42)
            .await;
        assert_eq!(second, 42);
    }

    #[test]
    fn test_reset_forces_closed() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow());
    }

    #[test]
    fn test_snapshot_counts() {
        let cb = breaker(2, 60_000);
        assert!(cb.allow());
        cb.record_failure();
        assert!(cb.allow());
        cb.record_failure();
        assert!(!cb.allow());

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.name, "model");
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 2);
        assert_eq!(snapshot.total_calls, 2);
        assert_eq!(snapshot.total_failures, 2);
        assert_eq!(snapshot.rejected_calls, 1);
        assert!(snapshot.last_failure_at.is_some());
    }

    #[test]
    fn test_breaker_error_into_ideafit_error() {
        let open: IdeaFitError = BreakerError::<IdeaFitError>::Open {
            domain: "search".to_string(),
        }
        .into();
        assert!(open.is_circuit_open());

        let inner = IdeaFitError::upstream("search", "503");
        let op: IdeaFitError = BreakerError::Operation(inner.clone()).into();
        assert_eq!(op, inner);
    }
}
