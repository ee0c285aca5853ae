//! Progress reporting and cooperative cancellation.

use crate::constants::PROGRESS_COMPLETE;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

// ============================================================================
// PHASES
// ============================================================================

/// Orchestrator phases, in execution order.
///
/// Ordering is derived so `a < b` means `a` runs before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisPhase {
    Validate,
    FetchModel,
    Structure,
    Finalize,
}

impl AnalysisPhase {
    pub const ALL: [AnalysisPhase; 4] = [
        Self::Validate,
        Self::FetchModel,
        Self::Structure,
        Self::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::FetchModel => "fetch-model",
            Self::Structure => "structure",
            Self::Finalize => "finalize",
        }
    }

    /// Inverse of [`AnalysisPhase::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.as_str() == name)
    }

    /// Checkpoint emitted when the phase starts.
    pub fn checkpoint(&self) -> u8 {
        use crate::constants::*;
        match self {
            Self::Validate => PROGRESS_VALIDATE,
            Self::FetchModel => PROGRESS_FETCH_MODEL,
            Self::Structure => PROGRESS_STRUCTURE,
            Self::Finalize => PROGRESS_FINALIZE,
        }
    }
}

impl std::fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PROGRESS SINK
// ============================================================================

/// Receiver of progress events. Fire-and-forget.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, phase: &str, pct: u8, note: Option<&str>);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, u8, Option<&str>) + Send + Sync,
{
    fn on_progress(&self, phase: &str, pct: u8, note: Option<&str>) {
        self(phase, pct, note)
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _phase: &str, _pct: u8, _note: Option<&str>) {}
}

/// Forwards events to a shared sink, dropping any that would move the
/// reported percentage backwards. Completion is forwarded once.
///
/// Used when several layers (cache, orchestrator) report into one sink.
pub struct MonotonicProgress {
    inner: Arc<dyn ProgressSink>,
    high_water: AtomicU8,
}

impl MonotonicProgress {
    pub fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            high_water: AtomicU8::new(0),
        }
    }

    /// Highest percentage forwarded so far.
    pub fn high_water(&self) -> u8 {
        self.high_water.load(Ordering::Acquire)
    }
}

impl ProgressSink for MonotonicProgress {
    fn on_progress(&self, phase: &str, pct: u8, note: Option<&str>) {
        let previous = self.high_water.fetch_max(pct, Ordering::AcqRel);
        if pct >= previous && previous < PROGRESS_COMPLETE {
            self.inner.on_progress(phase, pct, note);
        }
    }
}

// ============================================================================
// ABORT SIGNAL
// ============================================================================

/// Cooperative abort check, consulted between phases only.
pub trait AbortSignal: Send + Sync {
    fn is_aborted(&self) -> bool;
}

impl AbortSignal for AtomicBool {
    fn is_aborted(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<T: AbortSignal + ?Sized> AbortSignal for Arc<T> {
    fn is_aborted(&self) -> bool {
        (**self).is_aborted()
    }
}

/// Signal that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Adapter for closure-based abort checks.
pub struct AbortFn<F>(pub F);

impl<F> AbortSignal for AbortFn<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_aborted(&self) -> bool {
        (self.0)()
    }
}
