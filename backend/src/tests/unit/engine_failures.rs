// Engine behavior when a collaborator misbehaves

use approvals_shared::{InstanceStatus, Role, StepStatus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::directory::{DirectoryError, MockDirectory};
use crate::error::WorkflowError;
use crate::notifications::{MockNotifier, NotifyError};
use crate::store::{MockWorkflowStore, StoreError};
use crate::tests::{fixtures, test_start};
use crate::workflows::{DecisionRequest, WorkflowEngine};

fn engine(
    store: MockWorkflowStore,
    directory: MockDirectory,
    notifier: MockNotifier,
    config: EngineConfig,
) -> WorkflowEngine {
    WorkflowEngine::new(
        Arc::new(store),
        Arc::new(directory),
        Arc::new(notifier),
        Arc::new(ManualClock::new(test_start())),
        config,
    )
}

fn fast_retries() -> EngineConfig {
    EngineConfig {
        max_conflict_retries: 2,
        conflict_backoff: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_store_failure_is_internal() {
    let mut store = MockWorkflowStore::new();
    store
        .expect_find_instance()
        .times(1)
        .returning(|_| Err(StoreError::Unavailable("connection reset".to_string())));

    let engine = engine(store, MockDirectory::new(), MockNotifier::new(), fast_retries());
    let result = engine
        .submit_decision(Uuid::new_v4(), DecisionRequest::approve(Uuid::new_v4(), 0))
        .await;

    assert!(matches!(result, Err(WorkflowError::Internal(_))));
}

#[tokio::test]
async fn test_persistent_conflict_gives_up_after_retries() {
    let approver = Uuid::new_v4();
    let instance = fixtures::in_progress_instance(Uuid::new_v4(), &[approver]);
    let instance_id = instance.id;

    let mut store = MockWorkflowStore::new();
    store
        .expect_find_instance()
        .returning(move |_| Ok(Some(instance.clone())));
    store
        .expect_save_instance()
        .withf(|saved| saved.version == 2)
        .times(3)
        .returning(|saved| {
            Err(StoreError::Conflict {
                id: saved.id,
                expected: 1,
            })
        });

    // No event may go out for a transition that never landed
    let engine = engine(store, MockDirectory::new(), MockNotifier::new(), fast_retries());
    let result = engine
        .submit_decision(instance_id, DecisionRequest::approve(approver, 0))
        .await;

    assert!(matches!(result, Err(WorkflowError::ConcurrentModification(id)) if id == instance_id));
}

#[tokio::test]
async fn test_publish_failure_does_not_undo_transition() {
    let approver = Uuid::new_v4();
    let instance = fixtures::in_progress_instance(Uuid::new_v4(), &[approver]);
    let instance_id = instance.id;

    let mut store = MockWorkflowStore::new();
    store
        .expect_find_instance()
        .returning(move |_| Ok(Some(instance.clone())));
    store
        .expect_save_instance()
        .withf(|saved| saved.status == InstanceStatus::Approved)
        .times(1)
        .returning(|_| Ok(()));

    let mut notifier = MockNotifier::new();
    notifier
        .expect_publish()
        .times(3)
        .returning(|_| Err(NotifyError::Delivery("mail relay refused".to_string())));

    let engine = engine(store, MockDirectory::new(), notifier, fast_retries());
    let resolved = engine
        .submit_decision(instance_id, DecisionRequest::approve(approver, 0))
        .await
        .unwrap();

    assert_eq!(resolved.status, InstanceStatus::Approved);
    assert_eq!(resolved.executions[0].status, StepStatus::Approved);
    assert_eq!(resolved.version, 2);
}

#[tokio::test]
async fn test_directory_failure_is_internal() {
    let organization_id = Uuid::new_v4();
    let template = fixtures::purchase_template().into_template(organization_id, Uuid::new_v4(), test_start());
    let template_id = template.id;

    let mut store = MockWorkflowStore::new();
    store
        .expect_find_template()
        .returning(move |_| Ok(Some(template.clone())));
    store.expect_save_instance().never();

    let mut directory = MockDirectory::new();
    directory
        .expect_members_with_role()
        .returning(|_, _| Err(DirectoryError::Unavailable("ldap timeout".to_string())));

    let engine = engine(store, directory, MockNotifier::new(), fast_retries());
    let result = engine
        .create_instance(organization_id, template_id, fixtures::purchase_context(50), Uuid::new_v4())
        .await;

    assert!(matches!(result, Err(WorkflowError::Internal(_))));
}

#[tokio::test]
async fn test_failed_default_swap_keeps_previous_default() {
    let organization_id = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let previous = fixtures::purchase_template()
        .as_default()
        .into_template(organization_id, admin, test_start());
    let previous_id = previous.id;

    let mut store = MockWorkflowStore::new();
    store
        .expect_save_default_template()
        .times(1)
        .returning(|_, _| Err(StoreError::Unavailable("connection reset".to_string())));
    // The previous default is only ever touched inside the swap
    store.expect_save_template().never();
    store.expect_query_templates().never();
    store
        .expect_find_template()
        .returning(move |_| Ok(Some(previous.clone())));

    let mut directory = MockDirectory::new();
    directory
        .expect_roles_of()
        .returning(|_, _| Ok(HashSet::from([Role::Admin])));

    let engine = engine(store, directory, MockNotifier::new(), fast_retries());
    let result = engine
        .create_template(organization_id, fixtures::purchase_template().as_default(), admin)
        .await;
    assert!(matches!(result, Err(WorkflowError::Internal(_))));

    let kept = engine.get_template(previous_id).await.unwrap();
    assert!(kept.is_default);
    assert_eq!(kept.updated_at, None);
}

#[tokio::test]
async fn test_missing_instance_is_not_found() {
    let mut store = MockWorkflowStore::new();
    store.expect_find_instance().returning(|_| Ok(None));

    let engine = engine(store, MockDirectory::new(), MockNotifier::new(), fast_retries());
    let result = engine.get_instance(Uuid::new_v4()).await;

    assert!(matches!(result, Err(WorkflowError::NotFound(_))));
}
