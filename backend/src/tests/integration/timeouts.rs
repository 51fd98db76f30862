use approvals_shared::{
    Context, DecisionOutcome, InstanceStatus, Role, StepDefinition, StepStatus, TimeoutPolicy,
    WorkflowEventKind, SYSTEM_PRINCIPAL,
};
use chrono::Duration;

use crate::error::WorkflowError;
use crate::tests::fixtures;
use crate::tests::{drain, test_start, TestContext};
use crate::workflows::{DecisionRequest, TemplateDefinition};

#[tokio::test]
async fn test_deadline_is_stamped_on_activation() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    ctx.member(Role::Manager).await;

    let template = ctx
        .engine
        .create_template(
            ctx.organization_id,
            fixtures::timed_template(Role::Manager, 1, TimeoutPolicy::EscalateReject),
            author,
        )
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();

    assert_eq!(instance.executions[0].deadline, Some(test_start() + Duration::hours(1)));
}

#[tokio::test]
async fn test_sweep_only_acts_after_the_deadline() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    ctx.member(Role::Manager).await;

    let template = ctx
        .engine
        .create_template(
            ctx.organization_id,
            fixtures::timed_template(Role::Manager, 1, TimeoutPolicy::EscalateReject),
            author,
        )
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();

    ctx.clock.advance(Duration::minutes(59));
    assert!(ctx.engine.sweep_timeouts().await.unwrap().is_empty());
    let untouched = ctx.engine.get_instance(instance.id).await.unwrap();
    assert_eq!(untouched.status, InstanceStatus::InProgress);

    ctx.clock.advance(Duration::minutes(2));
    let swept = ctx.engine.sweep_timeouts().await.unwrap();
    assert_eq!(swept, vec![instance.id]);

    let expired = ctx.engine.get_instance(instance.id).await.unwrap();
    assert_eq!(expired.status, InstanceStatus::Expired);
    assert_eq!(expired.executions[0].status, StepStatus::Expired);
    assert_eq!(expired.resolved_at, Some(test_start() + Duration::minutes(61)));

    // A second sweep finds nothing left to do
    assert!(ctx.engine.sweep_timeouts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_decision_after_expiry_is_refused() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let manager = ctx.member(Role::Manager).await;

    let template = ctx
        .engine
        .create_template(
            ctx.organization_id,
            fixtures::timed_template(Role::Manager, 2, TimeoutPolicy::EscalateReject),
            author,
        )
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();

    ctx.clock.advance(Duration::hours(3));
    ctx.engine.sweep_timeouts().await.unwrap();

    let late = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::approve(manager, 0))
        .await;
    assert!(matches!(late, Err(WorkflowError::StepNotActive { step_number: 0 })));
}

#[tokio::test]
async fn test_auto_approve_on_timeout_advances_to_next_step() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    ctx.member(Role::Manager).await;
    let finance = ctx.member(Role::Finance).await;

    let definition = TemplateDefinition::new(&fixtures::template_name(), "travel")
        .with_step(
            StepDefinition::new(0, "Line manager")
                .with_role(Role::Manager)
                .with_timeout(24, TimeoutPolicy::AutoApproveOnTimeout),
        )
        .with_step(
            StepDefinition::new(1, "Finance")
                .with_role(Role::Finance)
                .with_timeout(48, TimeoutPolicy::EscalateReject),
        );
    let template = ctx
        .engine
        .create_template(ctx.organization_id, definition, author)
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();

    let mut events = ctx.events();
    ctx.clock.advance(Duration::hours(25));
    let swept = ctx.engine.sweep_timeouts().await.unwrap();
    assert_eq!(swept, vec![instance.id]);

    let advanced = ctx.engine.get_instance(instance.id).await.unwrap();
    assert_eq!(advanced.status, InstanceStatus::InProgress);
    assert_eq!(advanced.current_step, 1);
    assert_eq!(advanced.executions[0].status, StepStatus::Approved);

    let system_decision = &advanced.executions[0].decisions[0];
    assert_eq!(system_decision.approver_id, SYSTEM_PRINCIPAL);
    assert_eq!(system_decision.outcome, DecisionOutcome::Approve);

    // The next deadline counts from the moment the step activated
    assert_eq!(
        advanced.executions[1].deadline,
        Some(test_start() + Duration::hours(25) + Duration::hours(48))
    );

    let kinds: Vec<WorkflowEventKind> = drain(&mut events).iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![WorkflowEventKind::StepResolved, WorkflowEventKind::StepActivated]
    );

    let finished = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::approve(finance, 1))
        .await
        .unwrap();
    assert_eq!(finished.status, InstanceStatus::Approved);
}

#[tokio::test]
async fn test_sweep_skips_steps_without_deadlines() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    ctx.member(Role::Manager).await;

    let template = ctx
        .engine
        .create_template(ctx.organization_id, fixtures::purchase_template(), author)
        .await
        .unwrap();
    ctx.engine
        .create_instance(ctx.organization_id, template.id, fixtures::purchase_context(50), author)
        .await
        .unwrap();

    ctx.clock.advance(Duration::days(365));
    assert!(ctx.engine.sweep_timeouts().await.unwrap().is_empty());
}
