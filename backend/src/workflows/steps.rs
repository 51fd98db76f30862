// Step resolution - which template steps apply and who may approve them

use approvals_shared::{
    Context, OrganizationId, PrincipalId, StepDefinition, StepExecution, StepStatus, Template,
};
use std::collections::BTreeSet;
use tracing::debug;

use super::conditions;
use crate::directory::{Directory, DirectoryError};
use crate::error::{WorkflowError, WorkflowResult};

/// Steps whose conditions all hold for `context`, in ascending step order
pub fn resolve_applicable_steps(template: &Template, context: &Context) -> Vec<StepDefinition> {
    let mut applicable: Vec<StepDefinition> = template
        .steps
        .iter()
        .filter(|step| conditions::all_match(&step.conditions, context))
        .cloned()
        .collect();
    applicable.sort_by_key(|s| s.step_number);
    applicable
}

/// Union of the step's explicit approver ids and every organization member
/// holding one of its roles
pub async fn eligible_approvers(
    step: &StepDefinition,
    organization_id: OrganizationId,
    directory: &dyn Directory,
) -> Result<BTreeSet<PrincipalId>, DirectoryError> {
    let mut eligible: BTreeSet<PrincipalId> = step.approver_ids.iter().copied().collect();

    for role in &step.approver_roles {
        let members = directory.members_with_role(*role, organization_id).await?;
        eligible.extend(members);
    }

    Ok(eligible)
}

/// Effective quorum: the explicit threshold, else 1 for sequential steps and
/// the whole eligible set for parallel ones
pub fn required_approvals(step: &StepDefinition, eligible_count: usize) -> u32 {
    match step.required_approvals {
        Some(n) => n,
        None if step.is_parallel => eligible_count as u32,
        None => 1,
    }
}

/// Build one pending execution per applicable step, snapshotting approver
/// pools from the directory. Fails if any non-auto step ends up without
/// approvers or with a threshold it can never reach.
pub async fn plan_executions(
    steps: &[StepDefinition],
    organization_id: OrganizationId,
    directory: &dyn Directory,
) -> WorkflowResult<Vec<StepExecution>> {
    let mut executions = Vec::with_capacity(steps.len());

    for step in steps {
        let (eligible, required) = if step.auto_approve {
            (BTreeSet::new(), 0)
        } else {
            let eligible = eligible_approvers(step, organization_id, directory).await?;
            if eligible.is_empty() {
                return Err(WorkflowError::NoEligibleApprovers {
                    step_number: step.step_number,
                });
            }

            let required = required_approvals(step, eligible.len());
            if required as usize > eligible.len() {
                return Err(WorkflowError::validation_single(
                    format!("steps.{}.required_approvals", step.step_number),
                    format!(
                        "Step requires {} approvals but only {} approvers are eligible",
                        required,
                        eligible.len()
                    ),
                ));
            }
            (eligible, required)
        };

        debug!(
            step_number = step.step_number,
            eligible = eligible.len(),
            required,
            "Planned step execution"
        );

        executions.push(StepExecution {
            step_number: step.step_number,
            name: step.name.clone(),
            status: StepStatus::Pending,
            activated_at: None,
            deadline: None,
            resolved_at: None,
            eligible_approvers: eligible,
            required_approvals: required,
            decisions: Vec::new(),
        });
    }

    Ok(executions)
}
