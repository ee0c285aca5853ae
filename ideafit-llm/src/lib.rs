//! IdeaFit LLM - Producer Abstraction Layer
//!
//! Provider-agnostic trait for the external model call behind an analysis.
//! This crate defines the interface producers must implement and the raw
//! payload they return. Concrete providers are user-supplied.

pub mod guarded;

pub use guarded::GuardedProducer;

use async_trait::async_trait;
use ideafit_core::{IdeaFitResult, IdeaInput, RunId};
use serde::{Deserialize, Serialize};

// ============================================================================
// PRODUCER REQUEST
// ============================================================================

/// What a producer is asked to analyse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    /// Run this call belongs to.
    pub run_id: RunId,
    pub input: IdeaInput,
}

impl ProducerRequest {
    pub fn new(run_id: RunId, input: IdeaInput) -> Self {
        Self { run_id, input }
    }
}

// ============================================================================
// RAW PAYLOAD
// ============================================================================

/// Producer output before normalisation.
///
/// Models routinely omit fields, so everything is optional here and the
/// structure phase fills in defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase", default)]
pub struct RawAnalysis {
    pub summary: Option<String>,
    /// Composite fit score, nominally 0..=100.
    pub fit_score: Option<f64>,
    pub market_demand: Option<f64>,
    pub competition: Option<f64>,
    pub feasibility: Option<f64>,
    pub strengths: Option<Vec<String>>,
    pub risks: Option<Vec<String>>,
    pub competitors: Option<Vec<String>>,
    pub recommendations: Option<Vec<String>>,
}

impl RawAnalysis {
    /// Parse a JSON payload, reporting malformed input as an upstream error.
    pub fn from_json(producer: &str, raw: &str) -> IdeaFitResult<Self> {
        serde_json::from_str(raw).map_err(|e| {
            ideafit_core::UpstreamError::InvalidPayload {
                producer: producer.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// PRODUCER TRAIT
// ============================================================================

/// External collaborator that turns an idea into a raw analysis.
///
/// Implementations must fail instead of hanging and must not retry
/// internally; retry and isolation belong to the breaker wrapped around them.
///
/// # Example
/// ```ignore
/// struct ClaudeProducer { /* ... */ }
///
/// #[async_trait]
/// impl AnalysisProducer for ClaudeProducer {
///     fn producer_id(&self) -> &str { "claude" }
///     async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
///         // Call the model
///     }
/// }
/// ```
#[async_trait]
pub trait AnalysisProducer: Send + Sync {
    /// Stable identifier, also used as the breaker domain.
    fn producer_id(&self) -> &str;

    async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis>;
}

#[async_trait]
impl<P: AnalysisProducer + ?Sized> AnalysisProducer for std::sync::Arc<P> {
    fn producer_id(&self) -> &str {
        (**self).producer_id()
    }

    async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
        (**self).produce(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideafit_core::{IdeaFitError, UpstreamError};

    #[test]
    fn test_raw_analysis_tolerates_missing_fields() {
        let raw = RawAnalysis::from_json("model", r#"{"fitScore": 71.5, "risks": ["churn"]}"#)
            .expect("parse");
        assert_eq!(raw.fit_score, Some(71.5));
        assert_eq!(raw.risks, Some(vec!["churn".to_string()]));
        assert!(raw.summary.is_none());
        assert!(raw.strengths.is_none());
    }

    #[test]
    fn test_raw_analysis_rejects_malformed_payload() {
        let err = RawAnalysis::from_json("model", "not json").expect_err("malformed");
        assert!(matches!(
            err,
            IdeaFitError::Upstream(UpstreamError::InvalidPayload { ref producer, .. }) if producer == "model"
        ));
    }

    #[test]
    fn test_producer_request_serializes_camel_case() {
        let request = ProducerRequest::new(ideafit_core::new_run_id(), IdeaInput::new("x"));
        let json = serde_json::to_value(&request).expect("serialize");
        assert!(json.get("runId").is_some());
        assert_eq!(json["input"]["idea"], "x");
    }
}
