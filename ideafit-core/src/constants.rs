//! Constants for IdeaFit
//!
//! Default values for every tunable in the resilience layer.
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// SWR CACHE
// ============================================================================

/// Entry count above which `set` sweeps out entries older than the max age
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Hard max age for swept entries (2 hours)
pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 2 * 60 * 60;

/// Freshness window used when a caller does not pass one
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 5;

// ============================================================================
// DEDUPLICATION
// ============================================================================

/// TTL for durable and in-memory dedup records (10 minutes)
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 10 * 60;

/// Prefix for every durable key written by the dedup cache
pub const DEFAULT_DEDUP_NAMESPACE: &str = "ideafit:analysis:";

/// Parameter values longer than this are truncated before key derivation
pub const DEFAULT_KEY_VALUE_MAX_LEN: usize = 200;

/// Progress reported just before a producer is invoked
pub const DEDUP_PROGRESS_STARTED: u8 = 15;

/// Progress reported when a result is available
pub const PROGRESS_COMPLETE: u8 = 100;

// ============================================================================
// CIRCUIT BREAKERS
// ============================================================================

/// Consecutive failures before the state machine opens
pub const DEFAULT_CIRCUIT_MAX_FAILURES: u32 = 5;

/// How long an open circuit waits before allowing a probe
pub const DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS: u64 = 30;

/// Failures within the window before the window tracker blocks a domain
pub const DEFAULT_WINDOW_MAX_FAILURES: u32 = 5;

/// Sliding window length for the window tracker
pub const DEFAULT_WINDOW_MINUTES: u64 = 5;

// ============================================================================
// ANALYSIS PHASES
// ============================================================================

/// Progress checkpoint for the validate phase
pub const PROGRESS_VALIDATE: u8 = 5;

/// Progress checkpoint before the external producer call
pub const PROGRESS_FETCH_MODEL: u8 = 18;

/// Progress checkpoint for payload normalisation
pub const PROGRESS_STRUCTURE: u8 = 62;

/// Progress checkpoint for the finalize phase
pub const PROGRESS_FINALIZE: u8 = 92;

/// Answers with at most this many words and no figures count as vague
pub const VAGUE_MAX_WORDS: usize = 6;

/// Field text beyond this many characters is truncated before the producer call
pub const FIELD_MAX_CHARS: usize = 2000;
