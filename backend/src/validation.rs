//! Template definition validation
//!
//! Field-level rules (lengths, required collections) come from the
//! `validator` derive on [`TemplateDefinition`]; rules that span several
//! steps are checked here and collected into a single validation error.

use approvals_shared::{Condition, ConditionOperator, ContextValue, StepDefinition};
use std::collections::HashSet;
use validator::{Validate, ValidationErrors};

use crate::error::{ValidationBuilder, WorkflowError, WorkflowResult};
use crate::workflows::templates::TemplateDefinition;

/// Validated wrapper type - indicates the value has been validated
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Validated<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ValidationErrors> for WorkflowError {
    fn from(errors: ValidationErrors) -> Self {
        let mut builder = ValidationBuilder::new();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid ({})", field, error.code));
                builder.push(&field.to_string(), &message);
            }
        }
        builder
            .build()
            .unwrap_or_else(|| WorkflowError::validation_single("template", "Invalid template"))
    }
}

/// Validator builder for rules the derive cannot express
#[derive(Debug, Default)]
pub struct Validator {
    builder: ValidationBuilder,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with the errors reported by a `validator` derive
    pub fn from_derive(result: Result<(), ValidationErrors>) -> Self {
        let mut validator = Self::new();
        if let Err(errors) = result {
            if let WorkflowError::Validation { details } = WorkflowError::from(errors) {
                for (field, messages) in details {
                    for message in messages {
                        validator.builder.push(&field, &message);
                    }
                }
            }
        }
        validator
    }

    /// Add error for a field
    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.builder.push(field, message);
        self
    }

    /// Add error if condition is true
    pub fn error_if(self, condition: bool, field: &str, message: &str) -> Self {
        if condition {
            self.error(field, message)
        } else {
            self
        }
    }

    pub fn required_text(self, value: &str, field: &str) -> Self {
        self.error_if(
            value.trim().is_empty(),
            field,
            &format!("{} cannot be empty", field),
        )
    }

    /// Finish validation, returning error if any
    pub fn finish(self) -> WorkflowResult<()> {
        self.builder.finish()
    }

    /// Finish with a value if valid
    pub fn finish_with<T>(self, value: T) -> WorkflowResult<Validated<T>> {
        self.finish()?;
        Ok(Validated(value))
    }
}

/// Validate a template definition before it is stored.
///
/// Step-level rules: step numbers are unique, every step that is not
/// auto-approved names an approver pool, explicit thresholds are at least 1
/// (and no larger than an id-only pool), timeouts are at least an hour, and
/// each condition's value is usable with its operator.
pub fn validate_template(definition: TemplateDefinition) -> WorkflowResult<Validated<TemplateDefinition>> {
    let mut validator = Validator::from_derive(definition.validate())
        .required_text(&definition.name, "name")
        .required_text(&definition.category, "category");

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.step_number) {
            validator = validator.error(
                "steps",
                &format!("Step number {} is used more than once", step.step_number),
            );
        }
        validator = validate_step(validator, step);
    }

    validator.finish_with(definition)
}

fn validate_step(validator: Validator, step: &StepDefinition) -> Validator {
    let field = format!("steps.{}", step.step_number);

    let mut validator = validator
        .error_if(
            step.name.trim().is_empty(),
            &format!("{}.name", field),
            "Step name cannot be empty",
        )
        .error_if(
            !step.auto_approve && !step.has_approver_pool(),
            &format!("{}.approvers", field),
            "Step needs approver roles or approver ids unless it is auto-approved",
        )
        .error_if(
            step.timeout_hours == Some(0),
            &format!("{}.timeout_hours", field),
            "Timeout must be at least 1 hour",
        );

    if let Some(required) = step.required_approvals {
        validator = validator
            .error_if(
                required == 0,
                &format!("{}.required_approvals", field),
                "Required approvals must be at least 1",
            )
            .error_if(
                step.approver_roles.is_empty()
                    && !step.approver_ids.is_empty()
                    && required as usize > step.approver_ids.len(),
                &format!("{}.required_approvals", field),
                &format!(
                    "Required approvals ({}) exceed the {} listed approvers",
                    required,
                    step.approver_ids.len()
                ),
            );
    }

    for condition in &step.conditions {
        if let Some(problem) = condition_problem(condition) {
            validator = validator.error(&format!("{}.conditions", field), &problem);
        }
    }

    validator
}

fn condition_problem(condition: &Condition) -> Option<String> {
    if condition.field.trim().is_empty() {
        return Some("Condition field cannot be empty".to_string());
    }

    let op = condition.operator;
    let usable = match (&condition.value, op) {
        (ContextValue::Absent, ConditionOperator::Equals | ConditionOperator::NotEquals) => true,
        (ContextValue::Absent, _) => false,
        (ContextValue::Number(_) | ContextValue::Date(_), ConditionOperator::GreaterThan | ConditionOperator::LessThan) => true,
        (_, ConditionOperator::GreaterThan | ConditionOperator::LessThan) => false,
        (ContextValue::List(_), ConditionOperator::In) => true,
        (_, ConditionOperator::In) => false,
        _ => true,
    };

    if usable {
        None
    } else {
        Some(format!(
            "Operator '{}' cannot be used with the value given for '{}'",
            op.as_str(),
            condition.field
        ))
    }
}
