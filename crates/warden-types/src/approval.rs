//! Approval steps: one stage in an appeal's approval chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a single approval step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Waiting on an earlier step to resolve.
    Blocked,
    /// Eligible for actor action or automatic evaluation.
    Pending,
    Approved,
    Rejected,
    /// Bypassed: its `when` condition was false, or a failed step was
    /// allowed to fail, or an earlier step was rejected.
    Skipped,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal statuses are never transitioned again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Skipped)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step instance belonging to one appeal.
///
/// Approvals are created in bulk when an appeal is built from its policy
/// and are only ever transitioned afterwards, never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    /// Matches the originating policy step name; unique within the appeal.
    pub name: String,
    /// 0-based step order, strictly increasing and contiguous per appeal.
    pub index: usize,
    pub appeal_id: String,
    pub status: ApprovalStatus,
    pub policy_id: String,
    pub policy_version: u32,
    /// Resolved approver emails. Empty means the step is automatic.
    #[serde(default)]
    pub approvers: Vec<String>,
    /// Who acted on this step, when someone did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    /// Build the step instance at `index` for an appeal governed by the
    /// given policy identity. The first step starts pending, later steps
    /// start blocked until the state machine advances them.
    pub fn new(
        name: impl Into<String>,
        index: usize,
        appeal_id: impl Into<String>,
        policy_id: impl Into<String>,
        policy_version: u32,
        approvers: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            index,
            appeal_id: appeal_id.into(),
            status: if index == 0 {
                ApprovalStatus::Pending
            } else {
                ApprovalStatus::Blocked
            },
            policy_id: policy_id.into(),
            policy_version,
            approvers,
            actor: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A step with resolved approvers requires a human decision.
    pub fn is_manual(&self) -> bool {
        !self.approvers.is_empty()
    }

    pub fn approve(&mut self) {
        self.status = ApprovalStatus::Approved;
        self.updated_at = Utc::now();
    }

    pub fn reject(&mut self) {
        self.status = ApprovalStatus::Rejected;
        self.updated_at = Utc::now();
    }

    pub fn skip(&mut self) {
        self.status = ApprovalStatus::Skipped;
        self.updated_at = Utc::now();
    }

    pub fn unblock(&mut self) {
        self.status = ApprovalStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn has_approver(&self, email: &str) -> bool {
        self.approvers.iter().any(|a| a == email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_starts_pending_later_steps_blocked() {
        let first = Approval::new("lead", 0, "appeal-1", "policy-1", 1, vec![]);
        let second = Approval::new("admin", 1, "appeal-1", "policy-1", 1, vec![]);
        assert_eq!(first.status, ApprovalStatus::Pending);
        assert_eq!(second.status, ApprovalStatus::Blocked);
    }

    #[test]
    fn manual_when_approvers_resolved() {
        let auto = Approval::new("auto", 0, "a", "p", 1, vec![]);
        let manual = Approval::new("lead", 0, "a", "p", 1, vec!["lead@example.com".into()]);
        assert!(!auto.is_manual());
        assert!(manual.is_manual());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Skipped.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(!ApprovalStatus::Blocked.is_terminal());
    }
}
