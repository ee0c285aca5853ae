//! Error types for IdeaFit operations

use thiserror::Error;

/// Circuit breaker rejections.
///
/// The upstream was intentionally not called.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitError {
    #[error("Circuit open for {domain}, upstream temporarily unavailable")]
    Open { domain: String },
}

/// Failures reported by an external producer (model, search, trend lookups).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Producer {producer} failed: {reason}")]
    ProducerFailed { producer: String, reason: String },

    #[error("Producer {producer} timed out after {elapsed_ms}ms")]
    Timeout { producer: String, elapsed_ms: u64 },

    #[error("Invalid payload from {producer}: {reason}")]
    InvalidPayload { producer: String, reason: String },
}

/// Durable store failures.
///
/// The cache layers log these and carry on; they never fail a fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Durable read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Durable write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Durable store quota exceeded writing {key}: {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("Corrupt durable record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// In-memory storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Structural validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all IdeaFit errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdeaFitError {
    #[error("Circuit error: {0}")]
    Circuit(#[from] CircuitError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run cancelled before {phase}")]
    Cancelled { phase: String },
}

impl IdeaFitError {
    /// Shorthand for a producer failure.
    pub fn upstream(producer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream(UpstreamError::ProducerFailed {
            producer: producer.into(),
            reason: reason.into(),
        })
    }

    /// Shorthand for an open circuit.
    pub fn circuit_open(domain: impl Into<String>) -> Self {
        Self::Circuit(CircuitError::Open {
            domain: domain.into(),
        })
    }

    /// True when the upstream was deliberately not called.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Circuit(CircuitError::Open { .. }))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type alias for IdeaFit operations.
pub type IdeaFitResult<T> = Result<T, IdeaFitError>;

// =============================================================================
// TESTS
// =============================================================================
