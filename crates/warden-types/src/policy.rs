//! Policies: versioned governance configuration.
//!
//! A policy is immutable once published; updating one always yields a new
//! version. Appeals record the exact `(id, version)` pair that governs them.

use crate::{Appeal, AppealOptions, ResourceIdentifier};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How an approval step resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStrategy {
    /// Resolved by a human actor out of the step's approver list.
    Manual,
    /// Resolved by evaluating the step's `approve_if` expression.
    Auto,
}

/// One step of a policy's approval flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub strategy: StepStrategy,
    /// Skip the step entirely when this evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Auto steps only: approve when true, otherwise reject (or skip when
    /// `allow_failed` is set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_if: Option<String>,
    /// Manual steps only: literal emails or expressions producing emails.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Recorded on the step when an auto evaluation rejects it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// A failed auto evaluation skips the step instead of rejecting the
    /// appeal.
    #[serde(default)]
    pub allow_failed: bool,
}

/// A selectable access duration. An empty value means permanent access.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DurationOption {
    pub name: String,
    pub value: String,
}

/// Appeal eligibility rules attached to a policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppealConfig {
    #[serde(default)]
    pub duration_options: Vec<DurationOption>,
    #[serde(default)]
    pub allow_permanent_access: bool,
    /// Window before an active grant's expiry within which a new appeal for
    /// the same account/resource/role is accepted as an extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_active_access_extension_in: Option<String>,
    /// Permit `account_type=user` appeals created by someone other than the
    /// account owner.
    #[serde(default)]
    pub allow_on_behalf: bool,
}

/// IAM client configuration used to enrich appeals with requester details.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IamConfig {
    pub provider: String,
    pub config: serde_json::Value,
    /// Maps creator attribute keys to keys of the IAM user payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<HashMap<String, String>>,
}

/// Reference to a policy version from a provider's resource config or from
/// a requirement's additional appeal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub id: String,
    pub version: u32,
}

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("unable to parse condition field {0:?}")]
    InvalidField(String),
    #[error("condition references a resource but the appeal has none")]
    MissingResource,
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// An equality condition on a field of the appeal's resource, written as a
/// dotted path rooted at `$resource`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(rename = "match")]
    pub match_eq: serde_json::Value,
}

impl Condition {
    pub fn matches(&self, appeal: &Appeal) -> Result<bool, ConditionError> {
        let Some(path) = self.field.strip_prefix("$resource.") else {
            return Err(ConditionError::InvalidField(self.field.clone()));
        };
        let resource = appeal
            .resource
            .as_ref()
            .ok_or(ConditionError::MissingResource)?;
        let value = serde_json::to_value(resource)
            .map_err(|_| ConditionError::InvalidField(self.field.clone()))?;

        let mut current = &value;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Ok(false),
            }
        }
        Ok(*current == self.match_eq)
    }
}

/// Pattern match deciding whether a requirement fires for an appeal. Every
/// set field must match; fields are regular expressions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequirementTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RequirementTrigger {
    pub fn matches(&self, appeal: &Appeal) -> Result<bool, ConditionError> {
        let resource = appeal
            .resource
            .as_ref()
            .ok_or(ConditionError::MissingResource)?;

        let checks = [
            (&self.provider_type, resource.provider_type.as_str()),
            (&self.provider_urn, resource.provider_urn.as_str()),
            (&self.resource_type, resource.resource_type.as_str()),
            (&self.resource_urn, resource.urn.as_str()),
            (&self.role, appeal.role.as_str()),
        ];
        for (pattern, value) in checks {
            if let Some(pattern) = pattern {
                let re = Regex::new(pattern).map_err(|source| ConditionError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                if !re.is_match(value) {
                    return Ok(false);
                }
            }
        }
        for condition in &self.conditions {
            if !condition.matches(appeal)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// An appeal to be created automatically when a requirement fires.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdditionalAppeal {
    pub resource: ResourceIdentifier,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AppealOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
}

/// A policy-level trigger that spawns dependent appeals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Requirement {
    pub on: RequirementTrigger,
    pub appeals: Vec<AdditionalAppeal>,
}

/// Versioned approval policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appeal: Option<AppealConfig>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam: Option<IamConfig>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(id: impl Into<String>, version: u32, steps: Vec<Step>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            version,
            description: None,
            steps,
            appeal: None,
            requirements: Vec::new(),
            iam: None,
            labels: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resource;

    fn appeal_with_resource() -> Appeal {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "editor");
        appeal.resource = Some(Resource {
            id: "res-1".to_string(),
            provider_type: "postgres".to_string(),
            provider_urn: "pg-main".to_string(),
            resource_type: "database".to_string(),
            urn: "orders".to_string(),
            name: "Orders DB".to_string(),
            details: serde_json::json!({"owner": "dba@example.com", "tier": "gold"}),
            is_deleted: false,
        });
        appeal
    }

    #[test]
    fn condition_matches_nested_resource_field() {
        let appeal = appeal_with_resource();
        let condition = Condition {
            field: "$resource.details.tier".to_string(),
            match_eq: serde_json::json!("gold"),
        };
        assert!(condition.matches(&appeal).unwrap());

        let miss = Condition {
            field: "$resource.details.tier".to_string(),
            match_eq: serde_json::json!("silver"),
        };
        assert!(!miss.matches(&appeal).unwrap());
    }

    #[test]
    fn condition_requires_resource_root() {
        let appeal = appeal_with_resource();
        let condition = Condition {
            field: "$appeal.role".to_string(),
            match_eq: serde_json::json!("editor"),
        };
        assert!(matches!(
            condition.matches(&appeal),
            Err(ConditionError::InvalidField(_))
        ));
    }

    #[test]
    fn trigger_matches_on_all_set_patterns() {
        let appeal = appeal_with_resource();
        let trigger = RequirementTrigger {
            provider_type: Some("postgres".to_string()),
            resource_type: Some("data.*".to_string()),
            role: Some("editor".to_string()),
            ..RequirementTrigger::default()
        };
        assert!(trigger.matches(&appeal).unwrap());

        let miss = RequirementTrigger {
            provider_type: Some("bigquery".to_string()),
            ..RequirementTrigger::default()
        };
        assert!(!miss.matches(&appeal).unwrap());
    }

    #[test]
    fn unknown_condition_path_does_not_match() {
        let appeal = appeal_with_resource();
        let condition = Condition {
            field: "$resource.details.missing".to_string(),
            match_eq: serde_json::json!("anything"),
        };
        assert!(!condition.matches(&appeal).unwrap());
    }
}
