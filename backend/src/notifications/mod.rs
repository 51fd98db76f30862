//! Notification collaborator
//!
//! The engine publishes a `WorkflowEvent` for every state change. Delivery is
//! fire-and-forget: a failed publish is logged by the engine and never undoes
//! the transition that produced it.

use approvals_shared::{EventOutcome, WorkflowEvent, WorkflowEventKind};
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
    #[error("Notification database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: WorkflowEvent) -> Result<(), NotifyError>;
}

/// Fans events out to in-process subscribers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        // No subscriber is not a failure
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Writes one row per recipient into the `notifications` table
#[derive(Debug, Clone)]
pub struct PgNotifier {
    db_pool: PgPool,
}

impl PgNotifier {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn publish(&self, event: WorkflowEvent) -> Result<(), NotifyError> {
        let (title, message) = describe(&event);

        for recipient in &event.recipients {
            sqlx::query(
                r#"
                INSERT INTO notifications
                (id, user_id, title, message, notification_type, entity_type, entity_id, read, created_at)
                VALUES ($1, $2, $3, $4, $5, 'approval_instance', $6, false, $7)
                "#,
            )
            .bind(uuid::Uuid::new_v4())
            .bind(recipient)
            .bind(&title)
            .bind(&message)
            .bind(event.kind.as_str())
            .bind(event.instance_id)
            .bind(event.occurred_at)
            .execute(&self.db_pool)
            .await?;
        }

        Ok(())
    }
}

/// Human-readable title and body for an event
pub fn describe(event: &WorkflowEvent) -> (String, String) {
    let step = event
        .step_number
        .map(|n| format!("step {}", n))
        .unwrap_or_else(|| "request".to_string());

    match (event.kind, event.outcome) {
        (WorkflowEventKind::InstanceCreated, _) => (
            "Approval request submitted".to_string(),
            "Your request has entered the approval workflow".to_string(),
        ),
        (WorkflowEventKind::StepActivated, _) => (
            "Approval needed".to_string(),
            format!("A request is waiting for your decision at {}", step),
        ),
        (WorkflowEventKind::DecisionRecorded, outcome) => (
            "Decision recorded".to_string(),
            format!("A decision ({}) was recorded on {}", outcome_label(outcome), step),
        ),
        (WorkflowEventKind::StepResolved, outcome) => (
            "Approval step resolved".to_string(),
            format!("The request's {} was {}", step, outcome_label(outcome)),
        ),
        (WorkflowEventKind::InstanceResolved, outcome) => (
            format!("Request {}", outcome_label(outcome)),
            format!("Your approval request was {}", outcome_label(outcome)),
        ),
    }
}

fn outcome_label(outcome: EventOutcome) -> &'static str {
    match outcome {
        EventOutcome::InProgress => "in progress",
        EventOutcome::Approved => "approved",
        EventOutcome::Rejected => "rejected",
        EventOutcome::Expired => "expired",
        EventOutcome::Cancelled => "cancelled",
    }
}
