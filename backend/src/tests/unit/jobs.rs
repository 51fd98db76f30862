use approvals_shared::{Context, InstanceStatus, Role, TimeoutPolicy};
use chrono::Duration;
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::directory::MockDirectory;
use crate::jobs::{JobConfig, JobError, JobScheduler, JobStatus, TimeoutSweepJob, TIMEOUT_SWEEP_JOB};
use crate::notifications::MockNotifier;
use crate::store::{MockWorkflowStore, StoreError};
use crate::tests::{fixtures, test_start, TestContext};
use crate::workflows::WorkflowEngine;

async fn overdue_instance(ctx: &TestContext) -> uuid::Uuid {
    let admin = ctx.member(Role::Admin).await;
    ctx.member(Role::Manager).await;

    let template = ctx
        .engine
        .create_template(
            ctx.organization_id,
            fixtures::timed_template(Role::Manager, 4, TimeoutPolicy::EscalateReject),
            admin,
        )
        .await
        .unwrap();
    let instance = ctx
        .engine
        .create_instance(ctx.organization_id, template.id, Context::new(), admin)
        .await
        .unwrap();

    ctx.clock.advance(Duration::hours(5));
    instance.id
}

#[tokio::test]
async fn test_sweep_job_reports_swept_instances() {
    let ctx = TestContext::new();
    let instance_id = overdue_instance(&ctx).await;

    let result = TimeoutSweepJob::new(ctx.engine.clone()).run().await.unwrap();

    assert_eq!(result.instances_swept, 1);
    assert_eq!(result.swept_ids, vec![instance_id]);
    let stored = ctx.engine.get_instance(instance_id).await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Expired);
}

#[tokio::test]
async fn test_run_job_now_records_execution_log() {
    let ctx = TestContext::new();
    overdue_instance(&ctx).await;

    let scheduler = JobScheduler::new(ctx.engine.clone(), JobConfig::default())
        .await
        .unwrap();
    scheduler.run_job_now(TIMEOUT_SWEEP_JOB).await.unwrap();

    let logs = scheduler.get_execution_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].job_name, TIMEOUT_SWEEP_JOB);
    assert_eq!(logs[0].status, JobStatus::Completed);
    assert_eq!(logs[0].items_processed, 1);
    assert!(logs[0].errors.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_a_config_error() {
    let ctx = TestContext::new();
    let scheduler = JobScheduler::new(ctx.engine.clone(), JobConfig::default())
        .await
        .unwrap();

    let result = scheduler.run_job_now("nightly_report").await;

    assert!(matches!(result, Err(JobError::ConfigError(_))));
    assert!(scheduler.get_execution_logs().await.is_empty());
}

#[tokio::test]
async fn test_failed_sweep_is_logged() {
    let mut store = MockWorkflowStore::new();
    store
        .expect_find_overdue_instances()
        .returning(|_| Err(StoreError::Unavailable("pool exhausted".to_string())));

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(store),
        Arc::new(MockDirectory::new()),
        Arc::new(MockNotifier::new()),
        Arc::new(ManualClock::new(test_start())),
        EngineConfig::default(),
    ));
    let scheduler = JobScheduler::new(engine, JobConfig::default()).await.unwrap();

    let result = scheduler.run_job_now(TIMEOUT_SWEEP_JOB).await;
    assert!(matches!(result, Err(JobError::ExecutionError(_))));

    let logs = scheduler.get_execution_logs().await;
    assert_eq!(logs[0].status, JobStatus::Failed);
    assert_eq!(logs[0].errors.len(), 1);
}
