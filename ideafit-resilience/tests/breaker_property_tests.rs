//! Property-Based Tests for Breaker State Transitions
//!
//! Property: driving a breaker with an arbitrary sequence of successes and
//! failures (reset timeout never elapsing) SHALL leave it OPEN exactly when a
//! run of `max_failures` consecutive failures occurred.

use ideafit_core::{BreakerStrategy, CircuitBreakerConfig, CircuitState, WindowConfig};
use ideafit_resilience::{Breaker, BreakerRegistry, CircuitBreaker, WindowBreaker};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// MODEL
// ============================================================================

/// Reference model of the closed/open decision without timers.
fn expected_open(outcomes: &[bool], max_failures: u32) -> (bool, u32) {
    let mut open = false;
    let mut consecutive = 0u32;
    for &success in outcomes {
        if open {
            // Calls are rejected, nothing is recorded
            continue;
        }
        if success {
            consecutive = 0;
        } else {
            consecutive += 1;
            if consecutive >= max_failures {
                open = true;
            }
        }
    }
    (open, consecutive)
}

proptest! {
    #[test]
    fn prop_state_machine_matches_model(
        max_failures in 1u32..6,
        outcomes in proptest::collection::vec(any::<bool>(), 0..40),
    ) {
        let cb = CircuitBreaker::new(
            "model",
            CircuitBreakerConfig::new(max_failures, Duration::from_secs(3600)),
        );
        for &success in &outcomes {
            if !cb.allow() {
                continue;
            }
            if success {
                cb.record_success();
            } else {
                cb.record_failure();
            }
        }

        let (open, consecutive) = expected_open(&outcomes, max_failures);
        let expected_state = if open { CircuitState::Open } else { CircuitState::Closed };
        prop_assert_eq!(cb.state(), expected_state);
        prop_assert_eq!(cb.consecutive_failures(), consecutive);
        if cb.state() == CircuitState::Open {
            prop_assert!(cb.consecutive_failures() >= max_failures);
        }
    }

    #[test]
    fn prop_domains_never_interfere(
        failures_a in 0u32..10,
        failures_b in 0u32..10,
        strategy in prop_oneof![Just(BreakerStrategy::Window), Just(BreakerStrategy::StateMachine)],
    ) {
        let breaker: Box<dyn Breaker> = match strategy {
            BreakerStrategy::Window => Box::new(WindowBreaker::new(
                WindowConfig::new(3, Duration::from_secs(3600)),
            )),
            BreakerStrategy::StateMachine => Box::new(BreakerRegistry::new(
                CircuitBreakerConfig::new(3, Duration::from_secs(3600)),
            )),
        };
        for _ in 0..failures_a {
            breaker.record_failure("a");
        }
        for _ in 0..failures_b {
            breaker.record_failure("b");
        }
        prop_assert_eq!(breaker.allow("a"), failures_a < 3);
        prop_assert_eq!(breaker.allow("b"), failures_b < 3);
        prop_assert!(breaker.allow("untouched"));
    }
}
