use approvals_shared::{Instance, OrganizationId, Template};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use super::{next_deadline, InstanceFilter, StoreError, TemplateFilter, WorkflowStore};
use crate::pagination::{PaginatedResponse, PaginationParams};

/// Postgres-backed store. Whole documents live in a JSONB column; the columns
/// next to it exist only to filter and index on.
#[derive(Debug, Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    fn push_template_filters(
        builder: &mut QueryBuilder<'_, Postgres>,
        organization_id: OrganizationId,
        filter: &TemplateFilter,
    ) {
        builder.push(" WHERE organization_id = ").push_bind(organization_id);
        if let Some(category) = &filter.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(is_default) = filter.is_default {
            builder.push(" AND is_default = ").push_bind(is_default);
        }
        if let Some(is_active) = filter.is_active {
            builder.push(" AND is_active = ").push_bind(is_active);
        }
    }

    fn push_instance_filters(
        builder: &mut QueryBuilder<'_, Postgres>,
        organization_id: OrganizationId,
        filter: &InstanceFilter,
    ) {
        builder.push(" WHERE organization_id = ").push_bind(organization_id);
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(template_id) = filter.template_id {
            builder.push(" AND template_id = ").push_bind(template_id);
        }
        if let Some(category) = &filter.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(requester_id) = filter.requester_id {
            builder.push(" AND requester_id = ").push_bind(requester_id);
        }
        if let Some(approver_id) = filter.awaiting_approver {
            builder
                .push(" AND ")
                .push_bind(approver_id)
                .push(" = ANY(pending_approvers)");
        }
        if let Some(after) = filter.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            builder.push(" AND created_at < ").push_bind(before);
        }
    }

    fn upsert_template(template: &Template) -> Query<'_, Postgres, PgArguments> {
        sqlx::query(
            r#"
            INSERT INTO approval_templates
            (id, organization_id, name, category, is_active, is_default, created_at, updated_at, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, category = EXCLUDED.category,
                is_active = EXCLUDED.is_active, is_default = EXCLUDED.is_default,
                updated_at = EXCLUDED.updated_at, document = EXCLUDED.document
            "#,
        )
        .bind(template.id)
        .bind(template.organization_id)
        .bind(&template.name)
        .bind(&template.category)
        .bind(template.is_active)
        .bind(template.is_default)
        .bind(template.created_at)
        .bind(template.updated_at)
        .bind(Json(template))
    }

    async fn stored_version(&self, id: Uuid) -> Result<u64, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM approval_instances WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(version.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn save_template(&self, template: &Template) -> Result<(), StoreError> {
        Self::upsert_template(template).execute(&self.db_pool).await?;
        Ok(())
    }

    async fn save_default_template(
        &self,
        template: &Template,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.db_pool.begin().await?;

        // Clear first so the single-default index never sees two rows
        let cleared: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE approval_templates
            SET is_default = false, updated_at = $4,
                document = jsonb_set(
                    jsonb_set(document, '{is_default}', 'false'::jsonb),
                    '{updated_at}', to_jsonb($4::timestamptz)
                )
            WHERE organization_id = $1 AND category = $2 AND is_default AND id <> $3
            RETURNING id
            "#,
        )
        .bind(template.organization_id)
        .bind(&template.category)
        .bind(template.id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        Self::upsert_template(template).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(template_id = %template.id, cleared = cleared.len(), "Default template swapped");
        Ok(cleared)
    }

    async fn find_template(&self, id: Uuid) -> Result<Option<Template>, StoreError> {
        let document: Option<Json<Template>> =
            sqlx::query_scalar("SELECT document FROM approval_templates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(document.map(|Json(t)| t))
    }

    async fn query_templates(
        &self,
        organization_id: OrganizationId,
        filter: &TemplateFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Template>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM approval_templates");
        Self::push_template_filters(&mut count, organization_id, filter);
        let total: i64 = count.build().fetch_one(&self.db_pool).await?.try_get(0)?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT document FROM approval_templates");
        Self::push_template_filters(&mut select, organization_id, filter);
        select
            .push(" ORDER BY name ASC, id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build().fetch_all(&self.db_pool).await?;
        let data = rows
            .iter()
            .map(|row| row.try_get::<Json<Template>, _>("document").map(|Json(t)| t))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaginatedResponse::new(data, page, total))
    }

    async fn save_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let pending: Vec<Uuid> = instance.pending_approvers().into_iter().collect();
        let deadline = next_deadline(instance);

        let result = if instance.version == 1 {
            sqlx::query(
                r#"
                INSERT INTO approval_instances
                (id, organization_id, template_id, category, requester_id, status,
                 next_deadline, pending_approvers, version, created_at, updated_at, document)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(instance.id)
            .bind(instance.organization_id)
            .bind(instance.template_id)
            .bind(&instance.category)
            .bind(instance.requester_id)
            .bind(instance.status)
            .bind(deadline)
            .bind(&pending)
            .bind(instance.version as i64)
            .bind(instance.created_at)
            .bind(instance.updated_at)
            .bind(Json(instance))
            .execute(&self.db_pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE approval_instances
                SET status = $2, next_deadline = $3, pending_approvers = $4,
                    version = $5, updated_at = $6, document = $7
                WHERE id = $1 AND version = $8
                "#,
            )
            .bind(instance.id)
            .bind(instance.status)
            .bind(deadline)
            .bind(&pending)
            .bind(instance.version as i64)
            .bind(instance.updated_at)
            .bind(Json(instance))
            .bind(instance.version as i64 - 1)
            .execute(&self.db_pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let stored = self.stored_version(instance.id).await?;
            debug!(
                instance_id = %instance.id,
                stored_version = stored,
                attempted_version = instance.version,
                "Instance save lost a version race"
            );
            return Err(StoreError::Conflict {
                id: instance.id,
                expected: instance.version.saturating_sub(1),
            });
        }

        Ok(())
    }

    async fn find_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        let document: Option<Json<Instance>> =
            sqlx::query_scalar("SELECT document FROM approval_instances WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(document.map(|Json(i)| i))
    }

    async fn query_instances(
        &self,
        organization_id: OrganizationId,
        filter: &InstanceFilter,
        page: &PaginationParams,
    ) -> Result<PaginatedResponse<Instance>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM approval_instances");
        Self::push_instance_filters(&mut count, organization_id, filter);
        let total: i64 = count.build().fetch_one(&self.db_pool).await?.try_get(0)?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT document FROM approval_instances");
        Self::push_instance_filters(&mut select, organization_id, filter);
        select
            .push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build().fetch_all(&self.db_pool).await?;
        let data = rows
            .iter()
            .map(|row| row.try_get::<Json<Instance>, _>("document").map(|Json(i)| i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaginatedResponse::new(data, page, total))
    }

    async fn find_overdue_instances(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM approval_instances
            WHERE status = 'in_progress' AND next_deadline < $1
            ORDER BY next_deadline ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(ids)
    }
}
