//! Error taxonomy for the approval engine
//!
//! Every rejected operation carries a stable error code plus a human-readable
//! message. `ErrorBody` is the envelope transports hand back to callers.

use approvals_shared::StepStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::directory::DirectoryError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Validation failed")]
    Validation { details: HashMap<String, Vec<String>> },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Principal {approver_id} is not an eligible approver for step {step_number}")]
    UnauthorizedApprover { approver_id: Uuid, step_number: u32 },

    #[error("Step {step_number} is already resolved as {}", status_label(.status))]
    StepAlreadyResolved { step_number: u32, status: StepStatus },

    #[error("Step {step_number} is not the active step")]
    StepNotActive { step_number: u32 },

    #[error("Step {step_number} has no eligible approvers")]
    NoEligibleApprovers { step_number: u32 },

    #[error("No template step applies to the supplied context")]
    NoApplicableSteps,

    #[error("Instance {0} is being modified concurrently, retry the operation")]
    ConcurrentModification(Uuid),

    // Detail is logged, never shown
    #[error("An internal error occurred")]
    Internal(String),
}

fn status_label(status: &StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Active => "active",
        StepStatus::Approved => "approved",
        StepStatus::Rejected => "rejected",
        StepStatus::Expired => "expired",
        StepStatus::Cancelled => "cancelled",
    }
}

impl WorkflowError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::UnauthorizedApprover { .. } => "UNAUTHORIZED_APPROVER",
            Self::StepAlreadyResolved { .. } => "STEP_ALREADY_RESOLVED",
            Self::StepNotActive { .. } => "STEP_NOT_ACTIVE",
            Self::NoEligibleApprovers { .. } => "NO_ELIGIBLE_APPROVERS",
            Self::NoApplicableSteps => "NO_APPLICABLE_STEPS",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn validation_single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert(field.into(), vec![message.into()]);
        Self::Validation { details }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id, .. } => Self::ConcurrentModification(id),
            other => {
                tracing::error!(error = %other, "Store failure");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<DirectoryError> for WorkflowError {
    fn from(err: DirectoryError) -> Self {
        tracing::error!(error = %err, "Directory failure");
        Self::Internal(err.to_string())
    }
}

/// Serializable error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code (e.g. "VALIDATION_ERROR", "STEP_NOT_ACTIVE")
    pub code: String,
    pub message: String,
    /// Field-level errors for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl From<&WorkflowError> for ErrorBody {
    fn from(err: &WorkflowError) -> Self {
        let details = match err {
            WorkflowError::Validation { details } => Some(details.clone()),
            _ => None,
        };
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            details,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Helper to collect several validation errors before failing
#[derive(Debug, Default)]
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.push(field, message);
        self
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }

    pub fn build(self) -> Option<WorkflowError> {
        if !self.has_errors() {
            return None;
        }
        Some(WorkflowError::Validation {
            details: self.details,
        })
    }

    pub fn finish(self) -> WorkflowResult<()> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
