//! Lazily populated set of per-domain circuit breakers.

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::strategy::Breaker;
use ideafit_core::{BreakerStrategy, CircuitBreakerConfig, CircuitState};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// One [`CircuitBreaker`] per domain, created on first use.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// The breaker for `domain`, created with the registry config if absent.
    pub fn breaker(&self, domain: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(domain) {
            return existing;
        }
        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            breakers
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(domain, self.config.clone()))),
        )
    }

    /// The breaker for `domain` if one has been created.
    pub fn get(&self, domain: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(domain)
            .cloned()
    }

    pub fn state(&self, domain: &str) -> CircuitState {
        self.get(domain)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Snapshots sorted by domain name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.all().iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn force_open(&self, domain: &str) {
        self.breaker(domain).force_open();
    }

    pub fn reset_all(&self) {
        let breakers = self.all();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "All circuit breakers reset");
    }
}

impl Breaker for BreakerRegistry {
    fn strategy(&self) -> BreakerStrategy {
        BreakerStrategy::StateMachine
    }

    fn allow(&self, domain: &str) -> bool {
        self.breaker(domain).allow()
    }

    fn record_success(&self, domain: &str) {
        if let Some(breaker) = self.get(domain) {
            breaker.record_success();
        }
    }

    fn record_failure(&self, domain: &str) {
        self.breaker(domain).record_failure();
    }

    fn reset(&self, domain: &str) {
        if let Some(breaker) = self.get(domain) {
            breaker.reset();
        }
    }

    fn failure_counts(&self) -> HashMap<String, u32> {
        self.all()
            .iter()
            .map(|b| (b.name().to_string(), b.consecutive_failures()))
            .collect()
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("domains", &self.all().len())
            .field("config", &self.config)
            .finish()
    }
}
