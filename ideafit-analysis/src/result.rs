//! Canonical analysis result.

use crate::validation::ValidationIssue;
use ideafit_core::{AnalysisPhase, RunId, Timestamp};
use ideafit_llm::RawAnalysis;
use serde::{Deserialize, Serialize};

/// Normalised scores, each in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub fit: f64,
    pub market_demand: f64,
    pub competition: f64,
    pub feasibility: f64,
}

/// Producer payload after the structure phase.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnalysis {
    pub summary: String,
    pub scores: Scores,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub competitors: Vec<String>,
    pub recommendations: Vec<String>,
}

fn normalize_score(value: Option<f64>) -> f64 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn normalize_list(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

impl From<RawAnalysis> for StructuredAnalysis {
    /// Absent numbers become 0, absent collections become empty.
    fn from(raw: RawAnalysis) -> Self {
        Self {
            summary: raw.summary.map(|s| s.trim().to_string()).unwrap_or_default(),
            scores: Scores {
                fit: normalize_score(raw.fit_score),
                market_demand: normalize_score(raw.market_demand),
                competition: normalize_score(raw.competition),
                feasibility: normalize_score(raw.feasibility),
            },
            strengths: normalize_list(raw.strengths),
            risks: normalize_list(raw.risks),
            competitors: normalize_list(raw.competitors),
            recommendations: normalize_list(raw.recommendations),
        }
    }
}

/// Everything a completed run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub run_id: RunId,
    pub idea: String,
    /// Producer that generated the payload.
    pub producer: String,
    pub analysis: StructuredAnalysis,
    pub validation_issues: Vec<ValidationIssue>,
    /// 0..=100, from field specificity.
    pub evidence_score: u8,
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
    pub duration_ms: i64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed(AnalysisResult),
    /// Abort observed before `phase` started.
    Cancelled {
        phase: AnalysisPhase,
        progress_pct: u8,
    },
}

impl AnalysisOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_result(self) -> Option<AnalysisResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Cancelled { .. } => None,
        }
    }
}
