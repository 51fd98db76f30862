pub mod integration;

// Common test utilities and shared test setup
use approvals_shared::{Role, WorkflowEvent};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::directory::StaticDirectory;
use crate::notifications::BroadcastNotifier;
use crate::store::InMemoryStore;
use crate::workflows::WorkflowEngine;

/// Fixed starting instant for every test clock
pub fn test_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
}

/// An engine wired to in-memory collaborators plus handles on each of them
pub struct TestContext {
    pub engine: Arc<WorkflowEngine>,
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<StaticDirectory>,
    pub notifier: Arc<BroadcastNotifier>,
    pub clock: Arc<ManualClock>,
    pub organization_id: Uuid,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(StaticDirectory::new());
        let notifier = Arc::new(BroadcastNotifier::new(256));
        let clock = Arc::new(ManualClock::new(test_start()));

        let engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            directory.clone(),
            notifier.clone(),
            clock.clone(),
            config,
        ));

        Self {
            engine,
            store,
            directory,
            notifier,
            clock,
            organization_id: Uuid::new_v4(),
        }
    }

    /// A second engine over the same collaborators but with its own lock
    /// registry, as a second process would have
    pub fn sibling_engine(&self) -> Arc<WorkflowEngine> {
        Arc::new(WorkflowEngine::new(
            self.store.clone(),
            self.directory.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            EngineConfig::default(),
        ))
    }

    /// A new principal holding `role` in the test organization
    pub async fn member(&self, role: Role) -> Uuid {
        let principal = Uuid::new_v4();
        self.directory.grant(self.organization_id, principal, role).await;
        principal
    }

    pub async fn members(&self, role: Role, count: usize) -> Vec<Uuid> {
        let mut principals = Vec::with_capacity(count);
        for _ in 0..count {
            principals.push(self.member(role).await);
        }
        principals
    }

    pub fn events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.notifier.subscribe()
    }
}

/// Everything published so far on `receiver`
pub fn drain(receiver: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
