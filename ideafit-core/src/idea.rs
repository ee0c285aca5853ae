//! The user-submitted idea and its semantic fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Semantic fields the analysis pipeline inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub enum IdeaField {
    Problem,
    TargetUser,
    Solution,
    BusinessModel,
    Competitors,
    Differentiation,
}

impl IdeaField {
    /// Fields whose absence is an error.
    pub const CORE: [IdeaField; 3] = [Self::Problem, Self::TargetUser, Self::Solution];

    /// Fields whose absence is only a warning.
    pub const SECONDARY: [IdeaField; 3] =
        [Self::BusinessModel, Self::Competitors, Self::Differentiation];

    /// All required fields, core first, in validation order.
    pub const ALL: [IdeaField; 6] = [
        Self::Problem,
        Self::TargetUser,
        Self::Solution,
        Self::BusinessModel,
        Self::Competitors,
        Self::Differentiation,
    ];

    pub fn is_core(&self) -> bool {
        Self::CORE.contains(self)
    }

    /// Name as it appears in submitted forms and validation issues.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Problem => "problem",
            Self::TargetUser => "targetUser",
            Self::Solution => "solution",
            Self::BusinessModel => "businessModel",
            Self::Competitors => "competitors",
            Self::Differentiation => "differentiation",
        }
    }
}

impl std::fmt::Display for IdeaField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix for extra params in [`IdeaInput::key_params`].
pub const PARAM_PREFIX: &str = "param.";

/// An idea as submitted for analysis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdeaInput {
    /// One-line description of the idea.
    pub idea: String,
    pub problem: String,
    pub target_user: String,
    pub solution: String,
    pub business_model: String,
    pub competitors: String,
    pub differentiation: String,
    /// Extra caller parameters (region, industry, ...), part of the request key.
    pub params: BTreeMap<String, Value>,
}

impl IdeaInput {
    pub fn new(idea: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            ..Default::default()
        }
    }

    /// Builder-style setter for a semantic field.
    pub fn with_field(mut self, field: IdeaField, value: impl Into<String>) -> Self {
        *self.field_mut(field) = value.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, field: IdeaField) -> &str {
        match field {
            IdeaField::Problem => &self.problem,
            IdeaField::TargetUser => &self.target_user,
            IdeaField::Solution => &self.solution,
            IdeaField::BusinessModel => &self.business_model,
            IdeaField::Competitors => &self.competitors,
            IdeaField::Differentiation => &self.differentiation,
        }
    }

    fn field_mut(&mut self, field: IdeaField) -> &mut String {
        match field {
            IdeaField::Problem => &mut self.problem,
            IdeaField::TargetUser => &mut self.target_user,
            IdeaField::Solution => &mut self.solution,
            IdeaField::BusinessModel => &mut self.business_model,
            IdeaField::Competitors => &mut self.competitors,
            IdeaField::Differentiation => &mut self.differentiation,
        }
    }

    /// Every semantic field plus the extra params, as one parameter map.
    ///
    /// This is what request keys are derived from. Extra params are keyed
    /// under [`PARAM_PREFIX`] so they never collide with a field name.
    pub fn key_params(&self) -> BTreeMap<String, Value> {
        let mut params: BTreeMap<String, Value> = self
            .params
            .iter()
            .map(|(name, value)| (format!("{PARAM_PREFIX}{name}"), value.clone()))
            .collect();
        for field in IdeaField::ALL {
            params.insert(
                field.as_str().to_string(),
                Value::String(self.field(field).trim().to_string()),
            );
        }
        params
    }
}
