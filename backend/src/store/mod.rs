//! Persistence collaborator
//!
//! Templates and instances are stored as whole documents. Instance saves are
//! guarded by `Instance::version`: a save must carry exactly one more than the
//! stored version (1 for a new instance), otherwise it fails with
//! `StoreError::Conflict`.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use approvals_shared::{Instance, InstanceStatus, OrganizationId, PrincipalId, Template};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pagination::{PaginatedResponse, PaginationParams};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Version conflict on instance {id}: expected stored version {expected}")]
    Conflict { id: Uuid, expected: u64 },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateFilter {
    pub category: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

impl TemplateFilter {
    pub fn defaults_for(category: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            is_default: Some(true),
            is_active: None,
        }
    }

    pub fn matches(&self, template: &Template) -> bool {
        self.category.as_ref().is_none_or(|c| *c == template.category)
            && self.is_default.is_none_or(|d| d == template.is_default)
            && self.is_active.is_none_or(|a| a == template.is_active)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub status: Option<InstanceStatus>,
    pub template_id: Option<Uuid>,
    pub category: Option<String>,
    pub requester_id: Option<PrincipalId>,
    /// Instances whose active step still waits on this principal
    pub awaiting_approver: Option<PrincipalId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl InstanceFilter {
    pub fn awaiting(approver_id: PrincipalId) -> Self {
        Self {
            awaiting_approver: Some(approver_id),
            ..Self::default()
        }
    }

    pub fn with_status(status: InstanceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        self.status.is_none_or(|s| s == instance.status)
            && self.template_id.is_none_or(|t| t == instance.template_id)
            && self.category.as_ref().is_none_or(|c| *c == instance.category)
            && self.requester_id.is_none_or(|r| r == instance.requester_id)
            && self
                .awaiting_approver
                .is_none_or(|a| instance.pending_approvers().contains(&a))
            && self.created_after.is_none_or(|t| instance.created_at >= t)
            && self.created_before.is_none_or(|t| instance.created_at < t)
    }
}

/// Deadline of the instance's active step, if it is still in progress
pub fn next_deadline(instance: &Instance) -> Option<DateTime<Utc>> {
    if instance.status != InstanceStatus::InProgress {
        return None;
    }
    instance.active_execution().and_then(|e| e.deadline)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save_template(&self, template: &Template) -> Result<(), StoreError>;

    /// Save `template` as the default of its organization and category,
    /// clearing the previous default in the same write. Returns the ids of
    /// the templates that lost the flag.
    async fn save_default_template(
        &self,
        template: &Template,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, StoreError>;

    async fn query_templates(
        &self,
        organization_id: OrganizationId,
        filter: &TemplateFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Template>, StoreError>;

    async fn save_instance(&self, instance: &Instance) -> Result<(), StoreError>;

    async fn find_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError>;

    async fn query_instances(
        &self,
        organization_id: OrganizationId,
        filter: &InstanceFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Instance>, StoreError>;

    /// Ids of in-progress instances whose active step deadline is before `now`
    async fn find_overdue_instances(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}
