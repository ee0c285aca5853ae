//! Configuration types
//!
//! Every struct has a `Default` backed by [`crate::constants`], a `from_env()`
//! constructor reading `IDEAFIT_*` variables, and a `validate()` check.
//! Unparseable environment values fall back to the default.

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// SWR CACHE
// ============================================================================

/// Configuration for the stale-while-revalidate keyed cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwrCacheConfig {
    /// Entry count above which `set` runs an age sweep.
    pub capacity: usize,
    /// Entries older than this are removed by the sweep.
    pub max_age: Duration,
    /// TTL used when callers don't supply one.
    pub default_ttl: Duration,
}

impl Default for SwrCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            max_age: Duration::from_secs(DEFAULT_CACHE_MAX_AGE_SECS),
            default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_MINUTES * 60),
        }
    }
}

impl SwrCacheConfig {
    /// Create SwrCacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `IDEAFIT_CACHE_CAPACITY`: Sweep threshold (default: 1000)
    /// - `IDEAFIT_CACHE_MAX_AGE_SECS`: Hard max age for swept entries (default: 7200)
    /// - `IDEAFIT_CACHE_DEFAULT_TTL_MINUTES`: Default freshness window (default: 5)
    pub fn from_env() -> Self {
        Self {
            capacity: env_or("IDEAFIT_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            max_age: Duration::from_secs(env_or(
                "IDEAFIT_CACHE_MAX_AGE_SECS",
                DEFAULT_CACHE_MAX_AGE_SECS,
            )),
            default_ttl: Duration::from_secs(
                env_or(
                    "IDEAFIT_CACHE_DEFAULT_TTL_MINUTES",
                    DEFAULT_CACHE_TTL_MINUTES,
                ) * 60,
            ),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("cache.capacity", self.capacity as u64)?;
        positive("cache.max_age", self.max_age.as_millis() as u64)?;
        positive("cache.default_ttl", self.default_ttl.as_millis() as u64)
    }
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

/// Configuration for the in-flight deduplicating fetch cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a settled result stays valid, in memory and in the durable store.
    pub ttl: Duration,
    /// Prefix applied to every durable key.
    pub namespace: String,
    /// Parameter values are truncated to this many characters before hashing.
    pub max_value_len: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_DEDUP_TTL_SECS),
            namespace: DEFAULT_DEDUP_NAMESPACE.to_string(),
            max_value_len: DEFAULT_KEY_VALUE_MAX_LEN,
        }
    }
}

impl DedupConfig {
    /// Create DedupConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `IDEAFIT_DEDUP_TTL_SECS`: Record TTL (default: 600)
    /// - `IDEAFIT_DEDUP_NAMESPACE`: Durable key prefix (default: "ideafit:analysis:")
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_or("IDEAFIT_DEDUP_TTL_SECS", DEFAULT_DEDUP_TTL_SECS)),
            namespace: std::env::var("IDEAFIT_DEDUP_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_DEDUP_NAMESPACE.to_string()),
            max_value_len: DEFAULT_KEY_VALUE_MAX_LEN,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("dedup.ttl", self.ttl.as_millis() as u64)?;
        positive("dedup.max_value_len", self.max_value_len as u64)?;
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "dedup.namespace".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKERS
// ============================================================================

/// Configuration for the three-state circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Time an open circuit waits before letting a probe through.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_CIRCUIT_MAX_FAILURES,
            reset_timeout: Duration::from_secs(DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
        }
    }

    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `IDEAFIT_CIRCUIT_MAX_FAILURES`: Failures before opening (default: 5)
    /// - `IDEAFIT_CIRCUIT_RESET_TIMEOUT_SECS`: How long the circuit stays open (default: 30)
    pub fn from_env() -> Self {
        Self {
            max_failures: env_or("IDEAFIT_CIRCUIT_MAX_FAILURES", DEFAULT_CIRCUIT_MAX_FAILURES),
            reset_timeout: Duration::from_secs(env_or(
                "IDEAFIT_CIRCUIT_RESET_TIMEOUT_SECS",
                DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS,
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("circuit.max_failures", self.max_failures as u64)
    }
}

/// Configuration for the sliding-window failure tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Failures inside the window that block a domain.
    pub max_failures: u32,
    /// Window measured from the most recent failure.
    pub window: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_WINDOW_MAX_FAILURES,
            window: Duration::from_secs(DEFAULT_WINDOW_MINUTES * 60),
        }
    }
}

impl WindowConfig {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
        }
    }

    /// Create WindowConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `IDEAFIT_WINDOW_MAX_FAILURES`: Failures before blocking (default: 5)
    /// - `IDEAFIT_WINDOW_MINUTES`: Window length (default: 5)
    pub fn from_env() -> Self {
        Self {
            max_failures: env_or("IDEAFIT_WINDOW_MAX_FAILURES", DEFAULT_WINDOW_MAX_FAILURES),
            window: Duration::from_secs(
                env_or("IDEAFIT_WINDOW_MINUTES", DEFAULT_WINDOW_MINUTES) * 60,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("window.max_failures", self.max_failures as u64)?;
        positive("window.window", self.window.as_millis() as u64)
    }
}

/// Which failure-tracking semantics a breaker should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStrategy {
    /// Failure counter that resets once the window has elapsed.
    Window,
    /// Closed / open / half-open machine that needs a successful probe to close.
    #[default]
    StateMachine,
}

impl BreakerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::StateMachine => "state_machine",
        }
    }
}

impl FromStr for BreakerStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "window" => Ok(Self::Window),
            "state_machine" | "state-machine" => Ok(Self::StateMachine),
            other => Err(ConfigError::InvalidValue {
                field: "breaker.strategy".to_string(),
                value: other.to_string(),
                reason: "expected 'window' or 'state_machine'".to_string(),
            }),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Everything the analysis service needs to wire its caches and breakers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub cache: SwrCacheConfig,
    pub dedup: DedupConfig,
    pub circuit: CircuitBreakerConfig,
    pub window: WindowConfig,
    pub strategy: BreakerStrategy,
}

impl ResilienceConfig {
    /// Load every section from the environment.
    ///
    /// `IDEAFIT_BREAKER_STRATEGY` selects `window` or `state_machine`.
    pub fn from_env() -> Self {
        Self {
            cache: SwrCacheConfig::from_env(),
            dedup: DedupConfig::from_env(),
            circuit: CircuitBreakerConfig::from_env(),
            window: WindowConfig::from_env(),
            strategy: env_or("IDEAFIT_BREAKER_STRATEGY", BreakerStrategy::default()),
        }
    }

    pub fn with_strategy(mut self, strategy: BreakerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.dedup.validate()?;
        self.circuit.validate()?;
        self.window.validate()
    }
}
