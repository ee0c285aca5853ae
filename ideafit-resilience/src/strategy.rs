//! Unified breaker interface.

use crate::breaker::BreakerError;
use crate::registry::BreakerRegistry;
use crate::window::WindowBreaker;
use ideafit_core::{BreakerStrategy, ResilienceConfig};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Per-domain failure isolation.
///
/// Implementations must keep domains independent: failures recorded for one
/// domain never affect admission for another.
pub trait Breaker: Send + Sync {
    /// Which semantics this breaker implements.
    fn strategy(&self) -> BreakerStrategy;

    /// True when a call to `domain` may proceed.
    fn allow(&self, domain: &str) -> bool;

    fn record_success(&self, domain: &str);

    fn record_failure(&self, domain: &str);

    /// Clear all state for `domain`.
    fn reset(&self, domain: &str);

    /// Failure count per tracked domain.
    fn failure_counts(&self) -> HashMap<String, u32>;
}

/// Run `operation` for `domain` through any [`Breaker`].
pub async fn call_through<B, T, E, F, Fut>(
    breaker: &B,
    domain: &str,
    operation: F,
) -> Result<T, BreakerError<E>>
where
    B: Breaker + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if !breaker.allow(domain) {
        return Err(BreakerError::Open {
            domain: domain.to_string(),
        });
    }

    match operation().await {
        Ok(value) => {
            breaker.record_success(domain);
            Ok(value)
        }
        Err(e) => {
            breaker.record_failure(domain);
            Err(BreakerError::Operation(e))
        }
    }
}

/// Build the breaker selected by `config.strategy`.
pub fn build_breaker(config: &ResilienceConfig) -> Arc<dyn Breaker> {
    match config.strategy {
        BreakerStrategy::Window => Arc::new(WindowBreaker::new(config.window.clone())),
        BreakerStrategy::StateMachine => Arc::new(BreakerRegistry::new(config.circuit.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideafit_core::{CircuitBreakerConfig, WindowConfig};
    use std::time::Duration;

    fn config(strategy: BreakerStrategy) -> ResilienceConfig {
        let mut config = ResilienceConfig::default().with_strategy(strategy);
        config.circuit = CircuitBreakerConfig::new(2, Duration::from_secs(60));
        config.window = WindowConfig::new(2, Duration::from_secs(60));
        config
    }

    #[test]
    fn test_build_breaker_selects_strategy() {
        for strategy in [BreakerStrategy::Window, BreakerStrategy::StateMachine] {
            let breaker = build_breaker(&config(strategy));
            assert_eq!(breaker.strategy(), strategy);
        }
    }

    #[tokio::test]
    async fn test_call_through_blocks_after_threshold() {
        for strategy in [BreakerStrategy::Window, BreakerStrategy::StateMachine] {
            let breaker = build_breaker(&config(strategy));
            for _ in 0..2 {
                let result: Result<(), _> =
                    call_through(breaker.as_ref(), "model", || async { Err("down") }).await;
                assert!(matches!(result, Err(BreakerError::Operation("down"))));
            }

            let blocked: Result<u8, BreakerError<&str>> =
                call_through(breaker.as_ref(), "model", || async { Ok(1) }).await;
            assert!(blocked.is_err_and(|e| e.is_open()), "{strategy:?}");

            let other: Result<u8, BreakerError<&str>> =
                call_through(breaker.as_ref(), "search", || async { Ok(1) }).await;
            assert_eq!(other, Ok(1));
        }
    }

    #[tokio::test]
    async fn test_strategies_disagree_on_success() {
        let window = build_breaker(&config(BreakerStrategy::Window));
        let machine = build_breaker(&config(BreakerStrategy::StateMachine));
        for breaker in [&window, &machine] {
            breaker.record_failure("model");
            breaker.record_success("model");
            breaker.record_failure("model");
        }
        // The success cleared the consecutive count only for the state machine
        assert!(!window.allow("model"));
        assert!(machine.allow("model"));
    }
}
