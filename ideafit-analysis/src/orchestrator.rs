//! Phased analysis orchestrator.
//!
//! A run advances through `validate → fetch-model → structure → finalize`,
//! reporting one checkpoint per phase and 100 once the result is composed.
//! The abort signal is consulted only between phases; an in-flight producer
//! call is never interrupted.

use crate::result::{AnalysisOutcome, AnalysisResult, StructuredAnalysis};
use crate::validation::{evidence_score, prepare_input, validate_input};
use chrono::Utc;
use ideafit_core::constants::PROGRESS_COMPLETE;
use ideafit_core::{
    new_run_id, AbortSignal, AnalysisPhase, IdeaFitError, IdeaFitResult, IdeaInput, ProgressSink,
    RunId, UpstreamError,
};
use ideafit_llm::{AnalysisProducer, ProducerRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Tracks the phase and last reported percentage of one run.
struct RunTracker<'a> {
    run_id: RunId,
    progress: &'a dyn ProgressSink,
    abort: &'a dyn AbortSignal,
    pct: u8,
}

impl RunTracker<'_> {
    /// Start `phase`, or report where the run stopped.
    fn enter(&mut self, phase: AnalysisPhase) -> Option<AnalysisOutcome> {
        if self.abort.is_aborted() {
            debug!(run_id = %self.run_id, phase = %phase, pct = self.pct, "Run cancelled");
            return Some(AnalysisOutcome::Cancelled {
                phase,
                progress_pct: self.pct,
            });
        }
        self.pct = self.pct.max(phase.checkpoint());
        debug!(run_id = %self.run_id, phase = %phase, pct = self.pct, "Phase started");
        self.progress.on_progress(phase.as_str(), self.pct, None);
        None
    }
}

pub struct AnalysisOrchestrator {
    producer: Arc<dyn AnalysisProducer>,
}

impl AnalysisOrchestrator {
    pub fn new(producer: Arc<dyn AnalysisProducer>) -> Self {
        Self { producer }
    }

    pub fn producer_id(&self) -> &str {
        self.producer.producer_id()
    }

    /// Execute one run.
    ///
    /// Validation issues are attached to the result, never returned as
    /// errors. A producer failure aborts the run: circuit rejections pass
    /// through unchanged and anything else surfaces as an upstream error.
    pub async fn run(
        &self,
        input: IdeaInput,
        progress: &dyn ProgressSink,
        abort: &dyn AbortSignal,
    ) -> IdeaFitResult<AnalysisOutcome> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut tracker = RunTracker {
            run_id: new_run_id(),
            progress,
            abort,
            pct: 0,
        };

        if let Some(cancelled) = tracker.enter(AnalysisPhase::Validate) {
            return Ok(cancelled);
        }
        let validation_issues = validate_input(&input);
        let evidence = evidence_score(&input);
        let prepared = prepare_input(&input);

        if let Some(cancelled) = tracker.enter(AnalysisPhase::FetchModel) {
            return Ok(cancelled);
        }
        let request = ProducerRequest::new(tracker.run_id, prepared);
        let raw = self
            .producer
            .produce(request)
            .await
            .map_err(|e| self.upstream_failure(tracker.run_id, e))?;

        if let Some(cancelled) = tracker.enter(AnalysisPhase::Structure) {
            return Ok(cancelled);
        }
        let analysis = StructuredAnalysis::from(raw);

        if let Some(cancelled) = tracker.enter(AnalysisPhase::Finalize) {
            return Ok(cancelled);
        }
        let completed_at = Utc::now();
        let result = AnalysisResult {
            run_id: tracker.run_id,
            idea: input.idea.trim().to_string(),
            producer: self.producer_id().to_string(),
            analysis,
            validation_issues,
            evidence_score: evidence,
            started_at,
            completed_at,
            duration_ms: clock.elapsed().as_millis() as i64,
        };

        progress.on_progress(
            AnalysisPhase::Finalize.as_str(),
            PROGRESS_COMPLETE,
            Some("complete"),
        );
        debug!(
            run_id = %result.run_id,
            duration_ms = result.duration_ms,
            evidence_score = result.evidence_score,
            issues = result.validation_issues.len(),
            "Run completed"
        );
        Ok(AnalysisOutcome::Completed(result))
    }

    fn upstream_failure(&self, run_id: RunId, error: IdeaFitError) -> IdeaFitError {
        let producer = self.producer_id();
        if error.is_circuit_open() {
            debug!(run_id = %run_id, producer = %producer, "Producer circuit open");
            return error;
        }
        warn!(run_id = %run_id, producer = %producer, error = %error, "Producer call failed");
        match error {
            IdeaFitError::Upstream(_) => error,
            other => UpstreamError::ProducerFailed {
                producer: producer.to_string(),
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("producer", &self.producer_id())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
