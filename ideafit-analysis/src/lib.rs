//! IdeaFit Analysis - Orchestration and Service
//!
//! Runs the phased idea analysis and exposes the process-wide
//! [`AnalysisService`] that ties the caches, the breaker and the producer
//! together.
//!
//! # Example
//! ```ignore
//! let service = AnalysisService::in_memory(Arc::new(my_producer), ResilienceConfig::from_env())?;
//! let outcome = service
//!     .analyze(input, Arc::new(NoopProgress), Arc::new(NeverAbort))
//!     .await?;
//! ```

pub mod orchestrator;
pub mod result;
pub mod service;
pub mod telemetry;
pub mod validation;

pub use orchestrator::AnalysisOrchestrator;
pub use result::{AnalysisOutcome, AnalysisResult, Scores, StructuredAnalysis};
pub use service::{AnalysisService, Freshness, ServiceStats, SwrRead};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use validation::{
    classify, evidence_score, validate_input, IssueKind, Severity, Specificity, ValidationIssue,
};
