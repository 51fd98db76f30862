use approvals_shared::{Context, InstanceStatus, Role, StepDefinition, StepStatus};

use crate::tests::fixtures;
use crate::tests::TestContext;
use crate::workflows::{DecisionRequest, TemplateDefinition};

#[tokio::test]
async fn test_two_of_three_in_any_order() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let committee = ctx.members(Role::Approver, 3).await;

    let definition = TemplateDefinition::new(&fixtures::template_name(), "vendor").with_step(
        StepDefinition::new(0, "Vendor committee")
            .with_approvers(committee.iter().copied())
            .requiring(2),
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
    assert_eq!(instance.executions[0].required_approvals, 2);

    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::approve(committee[2], 0))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(instance.executions[0].status, StepStatus::Active);

    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::approve(committee[0], 0))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Approved);
    assert_eq!(instance.executions[0].approvals(), 2);
}

#[tokio::test]
async fn test_parallel_step_needs_everyone_by_default() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let board = ctx.members(Role::Approver, 3).await;

    let template = ctx
        .engine
        .create_template(ctx.organization_id, fixtures::board_template(&board), author)
        .await
        .unwrap();
    let mut instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();
    assert_eq!(instance.executions[0].required_approvals, 3);

    for (voted, member) in board.iter().enumerate() {
        assert_eq!(instance.status, InstanceStatus::InProgress, "after {} votes", voted);
        instance = ctx
            .engine
            .submit_decision(instance.id, DecisionRequest::approve(*member, 0))
            .await
            .unwrap();
    }

    assert_eq!(instance.status, InstanceStatus::Approved);
}

#[tokio::test]
async fn test_single_reject_fails_parallel_step() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let board = ctx.members(Role::Approver, 3).await;

    let template = ctx
        .engine
        .create_template(ctx.organization_id, fixtures::board_template(&board), author)
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), author)
        .await
        .unwrap();

    ctx.engine
        .submit_decision(instance.id, DecisionRequest::approve(board[0], 0))
        .await
        .unwrap();
    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::reject(board[1], 0))
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Rejected);
}

#[tokio::test]
async fn test_unanimous_reject_tolerates_dissent_while_quorum_is_reachable() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let panel = ctx.members(Role::Legal, 3).await;

    let definition = TemplateDefinition::new(&fixtures::template_name(), "contract").with_step(
        StepDefinition::new(0, "Legal panel")
            .with_role(Role::Legal)
            .requiring(2)
            .unanimous_reject(),
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

    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::reject(panel[0], 0))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);

    // Two approvals are no longer reachable from the remaining panel of one
    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::reject(panel[1], 0))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Rejected);
    assert_eq!(instance.executions[0].rejections(), 2);
}

#[tokio::test]
async fn test_changing_a_vote_before_resolution() {
    let ctx = TestContext::new();
    let author = ctx.member(Role::Admin).await;
    let panel = ctx.members(Role::Legal, 3).await;

    let definition = TemplateDefinition::new(&fixtures::template_name(), "contract").with_step(
        StepDefinition::new(0, "Legal panel")
            .with_role(Role::Legal)
            .requiring(2)
            .unanimous_reject(),
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

    ctx.engine
        .submit_decision(instance.id, DecisionRequest::reject(panel[0], 0))
        .await
        .unwrap();
    ctx.engine
        .submit_decision(instance.id, DecisionRequest::approve(panel[0], 0).with_comment("Reconsidered"))
        .await
        .unwrap();
    let instance = ctx
        .engine
        .submit_decision(instance.id, DecisionRequest::approve(panel[1], 0))
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Approved);
    assert_eq!(instance.executions[0].decisions.len(), 2);
    assert_eq!(instance.executions[0].rejections(), 0);
}
