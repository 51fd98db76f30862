// Template definitions - caller-supplied shape of an approval template

use approvals_shared::{OrganizationId, PrincipalId, StepDefinition, Template};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

fn default_true() -> bool {
    true
}

/// Input for creating or replacing a template
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TemplateDefinition {
    #[validate(length(min = 1, max = 200, message = "Name must be between 1 and 200 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "Category must be between 1 and 100 characters"))]
    pub category: String,
    #[validate(length(max = 2000, message = "Description must be 2000 characters or less"))]
    pub description: Option<String>,
    #[validate(length(min = 1, message = "At least one step is required"))]
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl TemplateDefinition {
    pub fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            description: None,
            steps: Vec::new(),
            is_active: true,
            is_default: false,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Materialize a new template with steps in ascending step order
    pub fn into_template(
        self,
        organization_id: OrganizationId,
        created_by: PrincipalId,
        now: DateTime<Utc>,
    ) -> Template {
        let mut steps = self.steps;
        steps.sort_by_key(|s| s.step_number);

        Template {
            id: Uuid::new_v4(),
            organization_id,
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            description: self.description,
            steps,
            is_active: self.is_active,
            is_default: self.is_default,
            created_by,
            created_at: now,
            updated_at: None,
        }
    }

    /// Overwrite an existing template's definition, keeping identity and ownership
    pub fn apply_to(self, template: &mut Template, now: DateTime<Utc>) {
        let mut steps = self.steps;
        steps.sort_by_key(|s| s.step_number);

        template.name = self.name.trim().to_string();
        template.category = self.category.trim().to_string();
        template.description = self.description;
        template.steps = steps;
        template.is_active = self.is_active;
        template.is_default = self.is_default;
        template.updated_at = Some(now);
    }
}
