//! Appeals: access requests tracked through an approval workflow.

use crate::{parse_duration, Approval, ApprovalStatus, DurationParseError, Policy, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Account type used when the requester appeals for themselves.
pub const DEFAULT_ACCOUNT_TYPE: &str = "user";

/// Actor recorded on revocations performed by background jobs.
pub const SYSTEM_ACTOR: &str = "system";

/// Lifecycle status of an appeal. All transitions are one-way; no terminal
/// state is ever re-entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppealStatus {
    Pending,
    Active,
    Rejected,
    Canceled,
    Terminated,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested access window: a duration string, an absolute expiration date,
/// or neither (permanent access, where the policy allows it).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppealOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
}

/// A single access request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Appeal {
    pub id: String,
    pub resource_id: String,
    pub policy_id: String,
    pub policy_version: u32,
    pub status: AppealStatus,
    pub account_id: String,
    pub account_type: String,
    pub created_by: String,
    /// Requester attributes fetched from the IAM client, keyed per the
    /// policy's IAM schema; referenced by approver expressions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<serde_json::Value>,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AppealOptions>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Resolved resource snapshot, attached at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appeal {
    pub fn new(
        resource_id: impl Into<String>,
        account_id: impl Into<String>,
        created_by: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let created_by = created_by.into();
        Self {
            id: Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            policy_id: String::new(),
            policy_version: 0,
            status: AppealStatus::Pending,
            account_id: account_id.into(),
            account_type: DEFAULT_ACCOUNT_TYPE.to_string(),
            created_by,
            creator: None,
            role: role.into(),
            permissions: Vec::new(),
            options: None,
            labels: HashMap::new(),
            resource: None,
            approvals: Vec::new(),
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill derivable fields left empty by the caller.
    pub fn set_defaults(&mut self) {
        if self.account_type.is_empty() {
            self.account_type = DEFAULT_ACCOUNT_TYPE.to_string();
        }
        if self.account_id.is_empty() {
            self.account_id = self.created_by.clone();
        }
    }

    /// Bind the appeal to the policy version that governs it. The binding
    /// is immutable for the rest of the appeal's life.
    pub fn init(&mut self, policy: &Policy) {
        self.status = AppealStatus::Pending;
        self.policy_id = policy.id.clone();
        self.policy_version = policy.version;
    }

    /// Activate the appeal, computing the expiration date from the
    /// requested duration when one was given.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), DurationParseError> {
        self.status = AppealStatus::Active;
        self.updated_at = now;
        if let Some(options) = &mut self.options {
            if let Some(duration) = options.duration.as_deref().filter(|d| !d.is_empty()) {
                options.expiration_date = Some(now + parse_duration(duration)?);
            }
        }
        Ok(())
    }

    pub fn reject(&mut self) {
        self.status = AppealStatus::Rejected;
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = AppealStatus::Canceled;
        self.updated_at = Utc::now();
    }

    /// Terminate an active appeal, recording who revoked it and why.
    pub fn terminate(&mut self, now: DateTime<Utc>, actor: impl Into<String>, reason: impl Into<String>) {
        self.status = AppealStatus::Terminated;
        self.revoked_at = Some(now);
        self.revoked_by = Some(actor.into());
        self.revoke_reason = Some(reason.into());
        self.updated_at = now;
    }

    /// The current manual step awaiting a decision, if any.
    pub fn next_pending_approval(&self) -> Option<&Approval> {
        self.approvals
            .iter()
            .find(|a| a.status == ApprovalStatus::Pending && a.is_manual())
    }

    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.options.as_ref().and_then(|o| o.expiration_date)
    }
}

/// Composite lookup key identifying "the same request" across appeals.
///
/// At most one pending and one active appeal may exist per key; the
/// orchestrator enforces this at creation time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AppealKey {
    pub account_id: String,
    pub resource_id: String,
    pub role: String,
}

impl AppealKey {
    pub fn of(appeal: &Appeal) -> Self {
        Self {
            account_id: appeal.account_id.clone(),
            resource_id: appeal.resource_id.clone(),
            role: appeal.role.clone(),
        }
    }
}

/// Filter for listing appeals through the repository.
#[derive(Clone, Debug, Default)]
pub struct AppealFilter {
    pub account_id: Option<String>,
    pub account_type: Option<String>,
    pub resource_id: Option<String>,
    pub role: Option<String>,
    pub statuses: Vec<AppealStatus>,
    pub expiration_date_less_than: Option<DateTime<Utc>>,
    pub expiration_date_greater_than: Option<DateTime<Utc>>,
}

impl AppealFilter {
    pub fn statuses(statuses: impl IntoIterator<Item = AppealStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Whether an appeal satisfies every set field of the filter.
    pub fn matches(&self, appeal: &Appeal) -> bool {
        if let Some(account_id) = &self.account_id {
            if appeal.account_id != *account_id {
                return false;
            }
        }
        if let Some(account_type) = &self.account_type {
            if appeal.account_type != *account_type {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if appeal.resource_id != *resource_id {
                return false;
            }
        }
        if let Some(role) = &self.role {
            if appeal.role != *role {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&appeal.status) {
            return false;
        }
        if let Some(before) = self.expiration_date_less_than {
            match appeal.expiration_date() {
                Some(expiry) if expiry < before => {}
                _ => return false,
            }
        }
        if let Some(after) = self.expiration_date_greater_than {
            match appeal.expiration_date() {
                Some(expiry) if expiry > after => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn set_defaults_fills_account_fields() {
        let mut appeal = Appeal::new("res-1", "", "user@example.com", "viewer");
        appeal.account_type = String::new();
        appeal.set_defaults();
        assert_eq!(appeal.account_type, DEFAULT_ACCOUNT_TYPE);
        assert_eq!(appeal.account_id, "user@example.com");
    }

    #[test]
    fn activate_computes_expiration_from_duration() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.options = Some(AppealOptions {
            duration: Some("24h".to_string()),
            expiration_date: None,
        });

        let now = Utc::now();
        appeal.activate(now).unwrap();

        assert_eq!(appeal.status, AppealStatus::Active);
        assert_eq!(appeal.expiration_date(), Some(now + Duration::hours(24)));
    }

    #[test]
    fn activate_without_duration_leaves_no_expiry() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.activate(Utc::now()).unwrap();
        assert_eq!(appeal.status, AppealStatus::Active);
        assert_eq!(appeal.expiration_date(), None);
    }

    #[test]
    fn activate_rejects_malformed_duration() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.options = Some(AppealOptions {
            duration: Some("soon".to_string()),
            expiration_date: None,
        });
        assert!(appeal.activate(Utc::now()).is_err());
    }

    #[test]
    fn terminate_records_revocation_metadata() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        let now = Utc::now();
        appeal.terminate(now, SYSTEM_ACTOR, "expired");
        assert_eq!(appeal.status, AppealStatus::Terminated);
        assert_eq!(appeal.revoked_at, Some(now));
        assert_eq!(appeal.revoked_by.as_deref(), Some(SYSTEM_ACTOR));
        assert_eq!(appeal.revoke_reason.as_deref(), Some("expired"));
    }

    #[test]
    fn filter_matches_on_status_and_expiry() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.options = Some(AppealOptions {
            duration: None,
            expiration_date: Some(Utc::now() - Duration::hours(1)),
        });
        appeal.status = AppealStatus::Active;

        let filter = AppealFilter {
            statuses: vec![AppealStatus::Active],
            expiration_date_less_than: Some(Utc::now()),
            ..AppealFilter::default()
        };
        assert!(filter.matches(&appeal));

        let future_filter = AppealFilter {
            expiration_date_greater_than: Some(Utc::now()),
            ..AppealFilter::default()
        };
        assert!(!future_filter.matches(&appeal));
    }

    #[test]
    fn next_pending_approval_skips_automatic_steps() {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.approvals = vec![
            Approval::new("auto", 0, &appeal.id, "p", 1, vec![]),
            Approval::new("lead", 1, &appeal.id, "p", 1, vec!["lead@example.com".into()]),
        ];
        appeal.approvals[1].unblock();
        let next = appeal.next_pending_approval().unwrap();
        assert_eq!(next.name, "lead");
    }
}
