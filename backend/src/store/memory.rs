use approvals_shared::{Instance, OrganizationId, Template};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{next_deadline, InstanceFilter, StoreError, TemplateFilter, WorkflowStore};
use crate::pagination::{PaginatedResponse, PaginationParams};

/// Process-local store used for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryStore {
    templates: RwLock<HashMap<Uuid, Template>>,
    instances: RwLock<HashMap<Uuid, Instance>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn save_template(&self, template: &Template) -> Result<(), StoreError> {
        let mut templates = self.templates.write().await;
        templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn save_default_template(
        &self,
        template: &Template,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut templates = self.templates.write().await;
        let mut cleared = Vec::new();

        for other in templates.values_mut() {
            if other.id != template.id
                && other.is_default
                && other.organization_id == template.organization_id
                && other.category == template.category
            {
                other.is_default = false;
                other.updated_at = Some(now);
                cleared.push(other.id);
            }
        }

        templates.insert(template.id, template.clone());
        Ok(cleared)
    }

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, StoreError> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn query_templates(
        &self,
        organization_id: OrganizationId,
        filter: &TemplateFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Template>, StoreError> {
        let templates = self.templates.read().await;
        let mut matching: Vec<Template> = templates
            .values()
            .filter(|t| t.organization_id == organization_id && filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(PaginatedResponse::from_items(matching, page))
    }

    async fn save_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut instances = self.instances.write().await;
        let stored_version = instances.get(&instance.id).map(|i| i.version).unwrap_or(0);

        if instance.version != stored_version + 1 {
            return Err(StoreError::Conflict {
                id: instance.id,
                expected: instance.version.saturating_sub(1),
            });
        }

        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn find_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn query_instances(
        &self,
        organization_id: OrganizationId,
        filter: &InstanceFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Instance>, StoreError> {
        let instances = self.instances.read().await;
        let mut matching: Vec<Instance> = instances
            .values()
            .filter(|i| i.organization_id == organization_id && filter.matches(i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(PaginatedResponse::from_items(matching, page))
    }

    async fn find_overdue_instances(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| next_deadline(i).is_some_and(|deadline| deadline < now))
            .map(|i| i.id)
            .collect())
    }
}
