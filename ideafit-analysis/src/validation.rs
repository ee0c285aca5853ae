//! Advisory validation of idea fields.
//!
//! Every semantic field is classified as specific, vague or missing. Issues
//! are collected and attached to the result; they never abort a run. The
//! same classification drives the evidence score.

use ideafit_core::constants::{FIELD_MAX_CHARS, VAGUE_MAX_WORDS};
use ideafit_core::fingerprint::truncate_chars;
use ideafit_core::{IdeaField, IdeaInput};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Digits or any currency symbol mark an answer as concrete.
static CONCRETE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\d\p{Sc}]").expect("Invalid concrete-marker regex"));

/// Answers that are present but say nothing.
const PLACEHOLDERS: [&str; 6] = ["n/a", "na", "none", "tbd", "todo", "unknown"];

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Missing,
    Vague,
    /// Present but unusable as submitted.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One advisory finding about a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub field: IdeaField,
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: IdeaField, kind: IssueKind, severity: Severity, message: String) -> Self {
        Self {
            field,
            kind,
            severity,
            message,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// How much evidence a field answer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specificity {
    Specific,
    Vague,
    Missing,
}

impl Specificity {
    /// Contribution to the evidence score.
    pub fn score(&self) -> f64 {
        match self {
            Self::Specific => 1.0,
            Self::Vague => 0.5,
            Self::Missing => 0.0,
        }
    }
}

fn is_placeholder(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PLACEHOLDERS.contains(&lowered.as_str()) || !text.chars().any(char::is_alphanumeric)
}

/// Classify one answer.
///
/// Blank text and placeholders are missing. Otherwise an answer is vague
/// when it has no digits or currency symbols and at most
/// [`VAGUE_MAX_WORDS`] words.
pub fn classify(text: &str) -> Specificity {
    let text = text.trim();
    if text.is_empty() || is_placeholder(text) {
        return Specificity::Missing;
    }
    let words = text.split_whitespace().count();
    if !CONCRETE_MARKER.is_match(text) && words <= VAGUE_MAX_WORDS {
        Specificity::Vague
    } else {
        Specificity::Specific
    }
}

/// Collect issues for every semantic field, in field order.
pub fn validate_input(input: &IdeaInput) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for field in IdeaField::ALL {
        let text = input.field(field);
        match classify(text) {
            Specificity::Missing => {
                let severity = if field.is_core() {
                    Severity::Error
                } else {
                    Severity::Warn
                };
                let message = if text.trim().is_empty() {
                    format!("{field} is missing")
                } else {
                    format!("{field} is a placeholder, not an answer")
                };
                issues.push(ValidationIssue::new(field, IssueKind::Missing, severity, message));
            }
            Specificity::Vague => issues.push(ValidationIssue::new(
                field,
                IssueKind::Vague,
                Severity::Warn,
                format!("{field} is vague; add figures, prices or named segments"),
            )),
            Specificity::Specific => {}
        }

        if text.chars().count() > FIELD_MAX_CHARS {
            issues.push(ValidationIssue::new(
                field,
                IssueKind::Invalid,
                Severity::Info,
                format!("{field} exceeds {FIELD_MAX_CHARS} characters and will be truncated"),
            ));
        }
    }
    issues
}

/// `round(100 × mean(score))` over every semantic field.
pub fn evidence_score(input: &IdeaInput) -> u8 {
    let total: f64 = IdeaField::ALL
        .iter()
        .map(|&field| classify(input.field(field)).score())
        .sum();
    let mean = total / IdeaField::ALL.len() as f64;
    (mean * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Copy of `input` with trimmed fields capped at [`FIELD_MAX_CHARS`].
pub fn prepare_input(input: &IdeaInput) -> IdeaInput {
    let mut prepared = IdeaInput {
        idea: input.idea.trim().to_string(),
        params: input.params.clone(),
        ..Default::default()
    };
    for field in IdeaField::ALL {
        let text = truncate_chars(input.field(field).trim(), FIELD_MAX_CHARS);
        prepared = prepared.with_field(field, text);
    }
    prepared
}
