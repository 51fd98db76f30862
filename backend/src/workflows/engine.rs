// Workflow Engine - Instance lifecycle and step advancement

use approvals_shared::{
    Context, DecisionOutcome, EventOutcome, Instance, InstanceStatus, OrganizationId, PrincipalId,
    StepStatus, Template, TimeoutPolicy, WorkflowEvent, WorkflowEventKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use super::quorum::{self, StepOutcome};
use super::steps;
use super::templates::TemplateDefinition;
use super::timeouts;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::directory::{self, Directory};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notifications::Notifier;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::store::{InstanceFilter, TemplateFilter, WorkflowStore};
use crate::validation::validate_template;

/// An approver's decision on an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub approver_id: PrincipalId,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    /// Step the decision is cast on; a stale step fails instead of landing on its successor
    pub step_number: u32,
}

impl DecisionRequest {
    pub fn approve(approver_id: PrincipalId, step_number: u32) -> Self {
        Self {
            approver_id,
            outcome: DecisionOutcome::Approve,
            comment: None,
            step_number,
        }
    }

    pub fn reject(approver_id: PrincipalId, step_number: u32) -> Self {
        Self {
            outcome: DecisionOutcome::Reject,
            ..Self::approve(approver_id, step_number)
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    instance_locks: KeyedLocks<Uuid>,
    default_locks: KeyedLocks<(OrganizationId, String)>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            clock,
            config,
            instance_locks: KeyedLocks::new(),
            default_locks: KeyedLocks::new(),
        }
    }

    // ===== Templates =====

    /// Validate and store a new template. Marking it as the category default
    /// requires an elevated role and clears any previous default.
    pub async fn create_template(
        &self,
        organization_id: OrganizationId,
        definition: TemplateDefinition,
        actor: PrincipalId,
    ) -> WorkflowResult<Template> {
        let definition = validate_template(definition)?.into_inner();

        if definition.is_default && !self.is_elevated(actor, organization_id).await? {
            return Err(WorkflowError::forbidden(
                "Only admins and managers can mark a default template",
            ));
        }

        let template = definition.into_template(organization_id, actor, self.clock.now());
        self.save_template(&template).await?;

        info!(
            template_id = %template.id,
            organization_id = %organization_id,
            category = %template.category,
            steps = template.steps.len(),
            is_default = template.is_default,
            "Approval template created"
        );
        Ok(template)
    }

    /// Replace a template's definition. Running instances keep the snapshot
    /// they were created with.
    pub async fn update_template(
        &self,
        template_id: Uuid,
        definition: TemplateDefinition,
        actor: PrincipalId,
    ) -> WorkflowResult<Template> {
        let mut template = self.load_template(template_id).await?;
        self.authorize_template_edit(&template, actor).await?;

        let definition = validate_template(definition)?.into_inner();
        if definition.is_default
            && !template.is_default
            && !self.is_elevated(actor, template.organization_id).await?
        {
            return Err(WorkflowError::forbidden(
                "Only admins and managers can mark a default template",
            ));
        }

        definition.apply_to(&mut template, self.clock.now());
        self.save_template(&template).await?;

        info!(template_id = %template.id, "Approval template updated");
        Ok(template)
    }

    pub async fn set_template_active(
        &self,
        template_id: Uuid,
        active: bool,
        actor: PrincipalId,
    ) -> WorkflowResult<Template> {
        let mut template = self.load_template(template_id).await?;
        self.authorize_template_edit(&template, actor).await?;

        if template.is_active == active {
            return Ok(template);
        }

        template.is_active = active;
        template.updated_at = Some(self.clock.now());
        self.store.save_template(&template).await?;

        info!(template_id = %template.id, active, "Approval template activation changed");
        Ok(template)
    }

    pub async fn get_template(&self, template_id: Uuid) -> WorkflowResult<Template> {
        self.load_template(template_id).await
    }

    pub async fn list_templates(
        &self,
        organization_id: OrganizationId,
        filter: &TemplateFilter,
        page: &PaginationParams,
    ) -> WorkflowResult<PaginatedResponse<Template>> {
        Ok(self.store.query_templates(organization_id, filter, page).await?)
    }

    // ===== Instances =====

    /// Start an approval run of `template_id` for `context`.
    ///
    /// Step applicability and approver pools are fixed here; later template
    /// edits or directory changes do not affect the instance.
    pub async fn create_instance(
        &self,
        organization_id: OrganizationId,
        template_id: Uuid,
        context: Context,
        requester_id: PrincipalId,
    ) -> WorkflowResult<Instance> {
        let template = self.load_template(template_id).await?;
        if template.organization_id != organization_id {
            return Err(WorkflowError::not_found("Template"));
        }
        if !template.is_active {
            return Err(WorkflowError::validation_single(
                "template_id",
                "Template is inactive and cannot be used for new requests",
            ));
        }

        let applicable = steps::resolve_applicable_steps(&template, &context);
        if applicable.is_empty() {
            return Err(WorkflowError::NoApplicableSteps);
        }

        let executions =
            steps::plan_executions(&applicable, organization_id, self.directory.as_ref()).await?;

        let now = self.clock.now();
        let mut instance = Instance {
            id: Uuid::new_v4(),
            organization_id,
            template_id: template.id,
            template_name: template.name.clone(),
            category: template.category.clone(),
            requester_id,
            status: InstanceStatus::Pending,
            current_step: 0,
            context,
            steps: applicable,
            executions,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            cancelled_by: None,
            version: 0,
        };

        let mut events = vec![event(
            &instance,
            WorkflowEventKind::InstanceCreated,
            None,
            EventOutcome::InProgress,
            BTreeSet::from([requester_id]),
            now,
        )];

        instance.status = InstanceStatus::InProgress;
        activate_from(&mut instance, 0, now, &mut events);

        info!(
            instance_id = %instance.id,
            template_id = %template.id,
            requester_id = %requester_id,
            steps = instance.executions.len(),
            "Approval instance created"
        );
        self.commit(instance, events).await
    }

    /// Start an approval run using the organization's default template for
    /// `category`
    pub async fn create_instance_for_category(
        &self,
        organization_id: OrganizationId,
        category: &str,
        context: Context,
        requester_id: PrincipalId,
    ) -> WorkflowResult<Instance> {
        let filter = TemplateFilter {
            is_active: Some(true),
            ..TemplateFilter::defaults_for(category)
        };
        let defaults = self
            .store
            .query_templates(organization_id, &filter, &PaginationParams::new(1, 1))
            .await?;

        let template = defaults.data.into_iter().next().ok_or_else(|| {
            WorkflowError::not_found(format!("Default template for category '{}'", category))
        })?;

        self.create_instance(organization_id, template.id, context, requester_id)
            .await
    }

    /// Record an approver's decision and advance the instance if the step
    /// reaches an outcome.
    pub async fn submit_decision(
        &self,
        instance_id: Uuid,
        request: DecisionRequest,
    ) -> WorkflowResult<Instance> {
        let request = &request;
        self.with_retries("submit_decision", instance_id, move || {
            self.try_submit_decision(instance_id, request)
        })
        .await
    }

    async fn try_submit_decision(
        &self,
        instance_id: Uuid,
        request: &DecisionRequest,
    ) -> WorkflowResult<Instance> {
        let _guard = self.lock_instance(instance_id).await?;
        let current = self.load_instance(instance_id).await?;
        let now = self.clock.now();

        let index = current
            .executions
            .iter()
            .position(|e| e.step_number == request.step_number)
            .ok_or_else(|| WorkflowError::not_found(format!("Step {}", request.step_number)))?;

        let target = current
            .executions
            .get(index)
            .ok_or_else(|| WorkflowError::Internal(format!("Instance {} has no step {}", instance_id, index)))?;

        if !target.is_eligible(request.approver_id) {
            return Err(WorkflowError::UnauthorizedApprover {
                approver_id: request.approver_id,
                step_number: target.step_number,
            });
        }
        if target.status != StepStatus::Active && target.decision_of(request.approver_id).is_none() {
            return Err(WorkflowError::StepNotActive {
                step_number: target.step_number,
            });
        }

        let mut instance = current.clone();
        let policy = instance.steps[index].rejection_policy;
        let execution = &mut instance.executions[index];
        let step_number = execution.step_number;

        let outcome = quorum::record_decision(
            execution,
            policy,
            request.approver_id,
            request.outcome,
            request.comment.clone(),
            now,
        )?;

        if outcome == StepOutcome::Unchanged {
            debug!(
                instance_id = %instance_id,
                step_number,
                approver_id = %request.approver_id,
                "Identical decision resubmitted"
            );
            return Ok(current);
        }

        info!(
            instance_id = %instance_id,
            step_number,
            approver_id = %request.approver_id,
            outcome = ?request.outcome,
            "Decision recorded"
        );

        let requester = BTreeSet::from([instance.requester_id]);
        let mut events = vec![event(
            &instance,
            WorkflowEventKind::DecisionRecorded,
            Some(step_number),
            request.outcome.into(),
            requester.clone(),
            now,
        )];

        match outcome {
            StepOutcome::Approved => {
                events.push(event(
                    &instance,
                    WorkflowEventKind::StepResolved,
                    Some(step_number),
                    EventOutcome::Approved,
                    requester,
                    now,
                ));
                activate_from(&mut instance, index + 1, now, &mut events);
            }
            StepOutcome::Rejected => {
                events.push(event(
                    &instance,
                    WorkflowEventKind::StepResolved,
                    Some(step_number),
                    EventOutcome::Rejected,
                    requester,
                    now,
                ));
                resolve_instance(&mut instance, InstanceStatus::Rejected, BTreeSet::new(), now, &mut events);
            }
            StepOutcome::Pending | StepOutcome::Unchanged => {}
        }

        self.commit(instance, events).await
    }

    /// Apply timeout policies to every instance whose active step is past its
    /// deadline. Returns the ids of instances that changed.
    pub async fn sweep_timeouts(&self) -> WorkflowResult<Vec<Uuid>> {
        let now = self.clock.now();
        let overdue = self.store.find_overdue_instances(now).await?;
        let mut swept = Vec::new();

        for instance_id in overdue {
            let result = self
                .with_retries("sweep_timeouts", instance_id, move || {
                    self.expire_overdue(instance_id)
                })
                .await;

            match result {
                Ok(true) => swept.push(instance_id),
                Ok(false) => {}
                Err(err) => warn!(
                    instance_id = %instance_id,
                    error = %err,
                    "Timeout sweep skipped instance"
                ),
            }
        }

        if !swept.is_empty() {
            info!(count = swept.len(), "Timeout sweep applied policies");
        }
        Ok(swept)
    }

    async fn expire_overdue(&self, instance_id: Uuid) -> WorkflowResult<bool> {
        let _guard = self.lock_instance(instance_id).await?;
        let mut instance = self.load_instance(instance_id).await?;
        let now = self.clock.now();

        // Re-checked under the lock; a decision may have landed meanwhile
        let Some(overdue) = timeouts::check_deadlines(&instance, now).into_iter().next() else {
            return Ok(false);
        };
        let Some(index) = instance
            .executions
            .iter()
            .position(|e| e.step_number == overdue.step_number)
        else {
            return Ok(false);
        };

        let step_number = overdue.step_number;
        let requester = BTreeSet::from([instance.requester_id]);
        let mut events = Vec::new();

        let policy = instance.steps[index].on_timeout;
        match policy {
            TimeoutPolicy::EscalateReject => {
                quorum::expire(&mut instance.executions[index], now);
                events.push(event(
                    &instance,
                    WorkflowEventKind::StepResolved,
                    Some(step_number),
                    EventOutcome::Expired,
                    requester,
                    now,
                ));
                resolve_instance(&mut instance, InstanceStatus::Expired, BTreeSet::new(), now, &mut events);
            }
            TimeoutPolicy::AutoApproveOnTimeout => {
                quorum::approve_as_system(&mut instance.executions[index], "Approved on timeout", now);
                events.push(event(
                    &instance,
                    WorkflowEventKind::StepResolved,
                    Some(step_number),
                    EventOutcome::Approved,
                    requester,
                    now,
                ));
                activate_from(&mut instance, index + 1, now, &mut events);
            }
        }

        info!(
            instance_id = %instance_id,
            step_number,
            policy = ?policy,
            "Step deadline elapsed"
        );
        self.commit(instance, events).await?;
        Ok(true)
    }

    /// Cancel an in-flight instance. Only the requester or an elevated
    /// member of the organization may cancel.
    pub async fn cancel_instance(&self, instance_id: Uuid, actor: PrincipalId) -> WorkflowResult<Instance> {
        self.with_retries("cancel_instance", instance_id, move || {
            self.try_cancel(instance_id, actor)
        })
        .await
    }

    async fn try_cancel(&self, instance_id: Uuid, actor: PrincipalId) -> WorkflowResult<Instance> {
        let _guard = self.lock_instance(instance_id).await?;
        let current = self.load_instance(instance_id).await?;

        if actor != current.requester_id && !self.is_elevated(actor, current.organization_id).await? {
            return Err(WorkflowError::forbidden(
                "Only the requester or an admin or manager can cancel this request",
            ));
        }

        match current.status {
            InstanceStatus::Cancelled => return Ok(current),
            status if status.is_terminal() => {
                return Err(WorkflowError::validation_single(
                    "status",
                    format!("Request is already {} and cannot be cancelled", status.as_str()),
                ));
            }
            _ => {}
        }

        let now = self.clock.now();
        let mut instance = current;
        let waiting_on = instance.pending_approvers();

        if let Some(execution) = instance
            .executions
            .iter_mut()
            .find(|e| e.status == StepStatus::Active)
        {
            quorum::cancel(execution, now);
        }
        instance.cancelled_by = Some(actor);

        let mut events = Vec::new();
        resolve_instance(&mut instance, InstanceStatus::Cancelled, waiting_on, now, &mut events);

        info!(instance_id = %instance_id, actor = %actor, "Approval instance cancelled");
        self.commit(instance, events).await
    }

    pub async fn get_instance(&self, instance_id: Uuid) -> WorkflowResult<Instance> {
        self.load_instance(instance_id).await
    }

    pub async fn list_instances(
        &self,
        organization_id: OrganizationId,
        filter: &InstanceFilter,
        page: &PaginationParams,
    ) -> WorkflowResult<PaginatedResponse<Instance>> {
        Ok(self.store.query_instances(organization_id, filter, page).await?)
    }

    // ===== Internals =====

    async fn load_template(&self, template_id: Uuid) -> WorkflowResult<Template> {
        self.store
            .find_template(template_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Template"))
    }

    async fn load_instance(&self, instance_id: Uuid) -> WorkflowResult<Instance> {
        self.store
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Instance"))
    }

    async fn is_elevated(&self, principal_id: PrincipalId, organization_id: OrganizationId) -> WorkflowResult<bool> {
        Ok(directory::is_elevated(self.directory.as_ref(), principal_id, organization_id).await?)
    }

    async fn authorize_template_edit(&self, template: &Template, actor: PrincipalId) -> WorkflowResult<()> {
        if actor == template.created_by || self.is_elevated(actor, template.organization_id).await? {
            Ok(())
        } else {
            Err(WorkflowError::forbidden(
                "Only the template author or an admin or manager can edit this template",
            ))
        }
    }

    async fn lock_instance(&self, instance_id: Uuid) -> WorkflowResult<tokio::sync::OwnedMutexGuard<()>> {
        self.instance_locks
            .acquire(&instance_id, self.config.lock_timeout)
            .await
            .ok_or(WorkflowError::ConcurrentModification(instance_id))
    }

    /// Save a template. A default template replaces the previous default of
    /// its organization and category in one store write.
    async fn save_template(&self, template: &Template) -> WorkflowResult<()> {
        if !template.is_default {
            self.store.save_template(template).await?;
            return Ok(());
        }

        let scope = (template.organization_id, template.category.clone());
        let _guard = self
            .default_locks
            .acquire(&scope, self.config.lock_timeout)
            .await
            .ok_or(WorkflowError::ConcurrentModification(template.id))?;

        let cleared = self
            .store
            .save_default_template(template, self.clock.now())
            .await?;

        for template_id in cleared {
            info!(
                template_id = %template_id,
                category = %template.category,
                "Cleared previous default template"
            );
        }
        Ok(())
    }

    /// Persist the working copy as the next version, then publish its events
    async fn commit(&self, mut instance: Instance, events: Vec<WorkflowEvent>) -> WorkflowResult<Instance> {
        instance.version += 1;
        instance.updated_at = self.clock.now();
        self.store.save_instance(&instance).await?;

        for event in events {
            let kind = event.kind;
            if let Err(err) = self.notifier.publish(event).await {
                warn!(
                    instance_id = %instance.id,
                    kind = kind.as_str(),
                    error = %err,
                    "Failed to publish workflow event"
                );
            }
        }

        Ok(instance)
    }

    async fn with_retries<T, F, Fut>(&self, operation: &'static str, instance_id: Uuid, mut attempt: F) -> WorkflowResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WorkflowResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.config.max_conflict_retries => {
                    retries += 1;
                    warn!(
                        instance_id = %instance_id,
                        operation,
                        retry = retries,
                        "Concurrent modification, retrying"
                    );
                    tokio::time::sleep(self.config.conflict_backoff * retries).await;
                }
                result => return result,
            }
        }
    }
}

/// Activate the first step at or after `start`, cascading through
/// auto-approved steps. Past the last step the instance is approved.
fn activate_from(instance: &mut Instance, start: usize, now: chrono::DateTime<chrono::Utc>, events: &mut Vec<WorkflowEvent>) {
    for index in start..instance.executions.len() {
        instance.current_step = index;
        let definition = instance.steps[index].clone();
        let execution = &mut instance.executions[index];

        execution.status = StepStatus::Active;
        execution.activated_at = Some(now);
        execution.deadline = timeouts::deadline_for(&definition, now);

        if definition.auto_approve {
            quorum::approve_as_system(execution, "Auto-approved step", now);
            let step_number = execution.step_number;
            events.push(event(
                instance,
                WorkflowEventKind::StepResolved,
                Some(step_number),
                EventOutcome::Approved,
                BTreeSet::from([instance.requester_id]),
                now,
            ));
            continue;
        }

        let recipients = execution.eligible_approvers.clone();
        let step_number = execution.step_number;
        debug!(instance_id = %instance.id, step_number, "Step activated");
        events.push(event(
            instance,
            WorkflowEventKind::StepActivated,
            Some(step_number),
            EventOutcome::InProgress,
            recipients,
            now,
        ));
        return;
    }

    resolve_instance(instance, InstanceStatus::Approved, BTreeSet::new(), now, events);
}

fn resolve_instance(
    instance: &mut Instance,
    status: InstanceStatus,
    extra_recipients: BTreeSet<PrincipalId>,
    now: chrono::DateTime<chrono::Utc>,
    events: &mut Vec<WorkflowEvent>,
) {
    instance.status = status;
    instance.resolved_at = Some(now);

    let mut recipients = extra_recipients;
    recipients.insert(instance.requester_id);

    info!(instance_id = %instance.id, status = status.as_str(), "Approval instance resolved");
    events.push(event(
        instance,
        WorkflowEventKind::InstanceResolved,
        None,
        status.into(),
        recipients,
        now,
    ));
}

fn event(
    instance: &Instance,
    kind: WorkflowEventKind,
    step_number: Option<u32>,
    outcome: EventOutcome,
    recipients: BTreeSet<PrincipalId>,
    now: chrono::DateTime<chrono::Utc>,
) -> WorkflowEvent {
    WorkflowEvent {
        id: Uuid::new_v4(),
        kind,
        instance_id: instance.id,
        organization_id: instance.organization_id,
        step_number,
        outcome,
        recipients,
        occurred_at: now,
    }
}
