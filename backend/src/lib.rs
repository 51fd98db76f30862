//! Approval workflow engine
//!
//! Routes business requests through multi-step approval templates. The
//! engine talks to its surroundings through three injected collaborators:
//! a [`store::WorkflowStore`], a [`directory::Directory`] and a
//! [`notifications::Notifier`].

pub mod clock;
pub mod config;
pub mod database;
pub mod directory;
pub mod error;
pub mod jobs;
pub mod notifications;
pub mod pagination;
pub mod store;
pub mod validation;
pub mod workflows;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig};
pub use error::{ErrorBody, ValidationBuilder, WorkflowError, WorkflowResult};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};
pub use workflows::{DecisionRequest, TemplateDefinition, WorkflowEngine};

#[cfg(test)]
mod tests;
