//! State machine: advances the ordered approval steps of an appeal.
//!
//! Advancement is idempotent and re-entrant; it may be called again
//! whenever new information arrives (a manual decision, a fresh creation).
//! Expression failures halt advancement fail-closed: callers must treat the
//! appeal state as indeterminate and retry after correcting the policy.

use crate::{appeal_vars, evaluate_expression, EngineError, EngineResult};
use warden_types::{Appeal, AppealStatus, ApprovalStatus, Policy, StepStrategy};

/// Advances approval step statuses against their policy steps.
#[derive(Clone, Debug, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Walk the steps in index order and resolve everything that can be
    /// resolved without a human decision:
    ///
    /// - terminal steps (approved/rejected/skipped) are left untouched;
    /// - a step whose `when` condition is false is skipped outright;
    /// - auto steps evaluate `approve_if` and approve, skip
    ///   (`allow_failed`), or reject with the step's configured reason;
    /// - a rejection rejects the appeal and skips every later step;
    /// - when the last step resolves approved/skipped, the appeal becomes
    ///   active-eligible and its status is set accordingly.
    pub fn advance(&self, appeal: &mut Appeal, policy: &Policy) -> EngineResult<()> {
        let total = appeal.approvals.len();
        for i in 0..total {
            if appeal.approvals[i].status == ApprovalStatus::Rejected {
                break;
            }

            if appeal.approvals[i].status == ApprovalStatus::Pending {
                let step_index = appeal.approvals[i].index;
                let step = policy.step(step_index).ok_or_else(|| EngineError::StepNotFound {
                    name: appeal.approvals[i].name.clone(),
                    index: step_index,
                })?;

                // Earlier transitions in this same pass are visible to the
                // expressions of later steps.
                let vars = appeal_vars(appeal)?;

                if let Some(when) = step.when.as_deref().filter(|w| !w.is_empty()) {
                    if !evaluate_expression(when, &vars)?.is_truthy() {
                        appeal.approvals[i].skip();
                        if i + 1 < total {
                            appeal.approvals[i + 1].unblock();
                        }
                    }
                }

                if appeal.approvals[i].status != ApprovalStatus::Skipped
                    && step.strategy == StepStrategy::Auto
                {
                    let approve_if = step
                        .approve_if
                        .as_deref()
                        .filter(|e| !e.is_empty())
                        .ok_or_else(|| EngineError::MissingApproveIf(step.name.clone()))?;

                    if evaluate_expression(approve_if, &vars)?.is_truthy() {
                        appeal.approvals[i].approve();
                        if i + 1 < total {
                            appeal.approvals[i + 1].unblock();
                        }
                    } else if step.allow_failed {
                        appeal.approvals[i].skip();
                        if i + 1 < total {
                            appeal.approvals[i + 1].unblock();
                        }
                    } else {
                        appeal.approvals[i].reason = step.rejection_reason.clone();
                        appeal.approvals[i].reject();
                        appeal.reject();
                        for later in appeal.approvals.iter_mut().skip(i + 1) {
                            later.skip();
                        }
                        return Ok(());
                    }
                }
            }

            let status = appeal.approvals[i].status;
            if i + 1 == total
                && matches!(status, ApprovalStatus::Approved | ApprovalStatus::Skipped)
            {
                appeal.status = AppealStatus::Active;
            }
        }

        Ok(())
    }
}
