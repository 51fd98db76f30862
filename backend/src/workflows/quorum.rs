// Quorum aggregation - folds decisions into a step outcome

use approvals_shared::{
    Decision, DecisionOutcome, PrincipalId, RejectionPolicy, StepExecution, StepStatus,
    SYSTEM_PRINCIPAL,
};
use chrono::{DateTime, Utc};

use crate::error::{WorkflowError, WorkflowResult};

/// Result of folding one decision into a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Decision recorded, quorum not reached yet
    Pending,
    Approved,
    Rejected,
    /// Identical resubmission, nothing was written
    Unchanged,
}

/// Record `approver`'s decision on the step and re-evaluate its quorum.
///
/// Errors leave the execution untouched.
pub fn record_decision(
    execution: &mut StepExecution,
    policy: RejectionPolicy,
    approver_id: PrincipalId,
    outcome: DecisionOutcome,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> WorkflowResult<StepOutcome> {
    if !execution.is_eligible(approver_id) {
        return Err(WorkflowError::UnauthorizedApprover {
            approver_id,
            step_number: execution.step_number,
        });
    }

    let previous = execution.decision_of(approver_id);

    // A resolved step only compares outcomes; the comment can no longer change
    if execution.status.is_terminal() {
        return if previous.is_some_and(|d| d.outcome == outcome) {
            Ok(StepOutcome::Unchanged)
        } else {
            Err(WorkflowError::StepAlreadyResolved {
                step_number: execution.step_number,
                status: execution.status,
            })
        };
    }

    if execution.status != StepStatus::Active {
        return Err(WorkflowError::StepNotActive {
            step_number: execution.step_number,
        });
    }

    if previous.is_some_and(|d| d.outcome == outcome && d.comment == comment) {
        return Ok(StepOutcome::Unchanged);
    }

    let decision = Decision {
        approver_id,
        outcome,
        comment,
        decided_at: now,
    };
    match execution.decisions.iter_mut().find(|d| d.approver_id == approver_id) {
        Some(existing) => *existing = decision,
        None => execution.decisions.push(decision),
    }

    let result = evaluate(execution, policy);
    match result {
        StepOutcome::Approved => resolve(execution, StepStatus::Approved, now),
        StepOutcome::Rejected => resolve(execution, StepStatus::Rejected, now),
        _ => {}
    }
    Ok(result)
}

fn evaluate(execution: &StepExecution, policy: RejectionPolicy) -> StepOutcome {
    let approvals = execution.approvals();
    let rejections = execution.rejections();
    let required = execution.required_approvals as usize;

    let rejected = match policy {
        RejectionPolicy::AnyReject => rejections > 0,
        RejectionPolicy::UnanimousReject => {
            let eligible = execution.eligible_approvers.len();
            rejections >= eligible || eligible - rejections < required
        }
    };

    if rejected {
        StepOutcome::Rejected
    } else if approvals >= required {
        StepOutcome::Approved
    } else {
        StepOutcome::Pending
    }
}

/// Resolve a step as approved on the engine's behalf
pub fn approve_as_system(execution: &mut StepExecution, reason: &str, now: DateTime<Utc>) {
    execution.decisions.push(Decision {
        approver_id: SYSTEM_PRINCIPAL,
        outcome: DecisionOutcome::Approve,
        comment: Some(reason.to_string()),
        decided_at: now,
    });
    resolve(execution, StepStatus::Approved, now);
}

pub fn expire(execution: &mut StepExecution, now: DateTime<Utc>) {
    resolve(execution, StepStatus::Expired, now);
}

pub fn cancel(execution: &mut StepExecution, now: DateTime<Utc>) {
    resolve(execution, StepStatus::Cancelled, now);
}

fn resolve(execution: &mut StepExecution, status: StepStatus, now: DateTime<Utc>) {
    execution.status = status;
    execution.resolved_at = Some(now);
}
