//! Sliding-window failure tracking.
//!
//! A lighter mechanism than [`crate::CircuitBreaker`]: each domain keeps a
//! failure count and the time of its last failure. Once the window has
//! elapsed since that failure the count resets; until then the domain is
//! blocked as soon as the count reaches the threshold. Successes are not
//! tracked, only elapsed time clears a blocked domain.

use crate::strategy::Breaker;
use ideafit_core::{BreakerStrategy, WindowConfig};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct DomainWindow {
    failures: u32,
    last_failure_at: Instant,
}

/// Per-domain failure counters.
#[derive(Debug, Default)]
pub struct WindowTracker {
    domains: Mutex<HashMap<String, DomainWindow>>,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<String, DomainWindow>> {
        self.domains.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True when `domain` may be called.
    ///
    /// Expired windows are dropped here, so a domain that has been quiet for
    /// `window` starts again from zero.
    pub fn allow_with(&self, domain: &str, max_failures: u32, window: Duration) -> bool {
        let mut domains = self.domains();
        let Some(entry) = domains.get(domain).copied() else {
            return true;
        };

        if entry.last_failure_at.elapsed() >= window {
            domains.remove(domain);
            debug!(domain = %domain, "Failure window elapsed, counter reset");
            return true;
        }

        let allowed = entry.failures < max_failures;
        if !allowed {
            debug!(
                domain = %domain,
                failures = entry.failures,
                max_failures,
                "Domain blocked by failure window"
            );
        }
        allowed
    }

    /// Count a failure for `domain`, returning the new count.
    pub fn record_failure(&self, domain: &str) -> u32 {
        let mut domains = self.domains();
        let now = Instant::now();
        let entry = domains.entry(domain.to_string()).or_insert(DomainWindow {
            failures: 0,
            last_failure_at: now,
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure_at = now;
        entry.failures
    }

    pub fn failures(&self, domain: &str) -> u32 {
        self.domains().get(domain).map(|w| w.failures).unwrap_or(0)
    }

    pub fn reset(&self, domain: &str) {
        self.domains().remove(domain);
    }

    pub fn clear(&self) {
        self.domains().clear();
    }

    /// Current counts, including domains whose window may have lapsed.
    pub fn failure_counts(&self) -> HashMap<String, u32> {
        self.domains()
            .iter()
            .map(|(domain, w)| (domain.clone(), w.failures))
            .collect()
    }
}

// ============================================================================
// WINDOW STRATEGY
// ============================================================================

/// [`Breaker`] backed by a [`WindowTracker`] with fixed thresholds.
#[derive(Debug)]
pub struct WindowBreaker {
    tracker: WindowTracker,
    config: WindowConfig,
}

impl WindowBreaker {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            tracker: WindowTracker::new(),
            config,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }
}

impl Breaker for WindowBreaker {
    fn strategy(&self) -> BreakerStrategy {
        BreakerStrategy::Window
    }

    fn allow(&self, domain: &str) -> bool {
        self.tracker
            .allow_with(domain, self.config.max_failures, self.config.window)
    }

    fn record_success(&self, _domain: &str) {}

    fn record_failure(&self, domain: &str) {
        let failures = self.tracker.record_failure(domain);
        if failures == self.config.max_failures {
            warn!(
                domain = %domain,
                failures,
                window_secs = self.config.window.as_secs(),
                "Failure window threshold reached, domain blocked"
            );
        }
    }

    fn reset(&self, domain: &str) {
        self.tracker.reset(domain);
    }

    fn failure_counts(&self) -> HashMap<String, u32> {
        self.tracker.failure_counts()
    }
}
