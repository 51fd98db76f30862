// Timeout checks - which active steps have run past their deadline

use approvals_shared::{Instance, StepDefinition, StepExecution, StepStatus};
use chrono::{DateTime, Duration, Utc};

/// Deadline for a step activated at `activated_at`, if the step has a timeout
pub fn deadline_for(step: &StepDefinition, activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    step.timeout_hours
        .map(|hours| activated_at + Duration::hours(i64::from(hours)))
}

/// Active executions whose deadline is strictly before `now`. Terminal
/// instances never report overdue steps.
pub fn check_deadlines(instance: &Instance, now: DateTime<Utc>) -> Vec<StepExecution> {
    if instance.is_terminal() {
        return Vec::new();
    }

    instance
        .executions
        .iter()
        .filter(|e| e.status == StepStatus::Active)
        .filter(|e| e.deadline.is_some_and(|deadline| deadline < now))
        .cloned()
        .collect()
}
