// Approval Workflow Engine
//
// Routes a request through the applicable steps of a template, aggregating
// approver decisions per step and escalating steps whose deadline elapses.

pub mod conditions;
pub mod engine;
pub mod locks;
pub mod quorum;
pub mod steps;
pub mod templates;
pub mod timeouts;

pub use engine::{DecisionRequest, WorkflowEngine};
pub use quorum::StepOutcome;
pub use templates::TemplateDefinition;
