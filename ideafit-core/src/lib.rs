//! IdeaFit Core - Shared Types
//!
//! Pure data structures for the IdeaFit resilience layer. Every other crate
//! depends on this one; it carries no I/O and no runtime.

pub mod circuit;
pub mod config;
pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod idea;
pub mod progress;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use circuit::{CircuitState, CircuitStateParseError};
pub use config::{
    BreakerStrategy, CircuitBreakerConfig, DedupConfig, ResilienceConfig, SwrCacheConfig,
    WindowConfig,
};
pub use error::{
    CircuitError, ConfigError, IdeaFitError, IdeaFitResult, PersistenceError, StorageError,
    UpstreamError, ValidationError,
};
pub use fingerprint::{generate_key, generate_key_from, normalize_text, request_key};
pub use idea::{IdeaField, IdeaInput, PARAM_PREFIX};
pub use progress::{
    AbortFn, AbortSignal, AnalysisPhase, MonotonicProgress, NeverAbort, NoopProgress, ProgressSink,
};

/// Analysis run identifier (UUIDv7, timestamp-sortable).
pub type RunId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 run id.
pub fn new_run_id() -> RunId {
    Uuid::now_v7()
}

/// Milliseconds since the Unix epoch, as stored in durable records.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
