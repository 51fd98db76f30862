//! User/role directory collaborator
//!
//! Answers "which roles does principal P hold in organization O" and the
//! reverse lookup needed to expand a step's approver roles into principals.

use approvals_shared::{OrganizationId, PrincipalId, Role};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
    #[error("Directory database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    async fn roles_of(
        &self,
        principal_id: PrincipalId,
        organization_id: OrganizationId,
    ) -> Result<HashSet<Role>, DirectoryError>;

    async fn members_with_role(
        &self,
        role: Role,
        organization_id: OrganizationId,
    ) -> Result<HashSet<PrincipalId>, DirectoryError>;
}

/// Does the principal hold an elevated role in the organization?
pub async fn is_elevated(
    directory: &dyn Directory,
    principal_id: PrincipalId,
    organization_id: OrganizationId,
) -> Result<bool, DirectoryError> {
    let roles = directory.roles_of(principal_id, organization_id).await?;
    Ok(roles.iter().any(Role::is_elevated))
}

/// In-process directory for embedding and tests
#[derive(Debug, Default)]
pub struct StaticDirectory {
    memberships: RwLock<HashMap<(OrganizationId, PrincipalId), HashSet<Role>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, organization_id: OrganizationId, principal_id: PrincipalId, role: Role) {
        let mut memberships = self.memberships.write().await;
        memberships
            .entry((organization_id, principal_id))
            .or_default()
            .insert(role);
    }

    pub async fn revoke(&self, organization_id: OrganizationId, principal_id: PrincipalId, role: Role) {
        let mut memberships = self.memberships.write().await;
        if let Some(roles) = memberships.get_mut(&(organization_id, principal_id)) {
            roles.remove(&role);
        }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn roles_of(
        &self,
        principal_id: PrincipalId,
        organization_id: OrganizationId,
    ) -> Result<HashSet<Role>, DirectoryError> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .get(&(organization_id, principal_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn members_with_role(
        &self,
        role: Role,
        organization_id: OrganizationId,
    ) -> Result<HashSet<PrincipalId>, DirectoryError> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .iter()
            .filter(|((org, _), roles)| *org == organization_id && roles.contains(&role))
            .map(|((_, principal), _)| *principal)
            .collect())
    }
}

/// Directory backed by the `organization_members` table
#[derive(Debug, Clone)]
pub struct PgDirectory {
    db_pool: PgPool,
}

impl PgDirectory {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn roles_of(
        &self,
        principal_id: PrincipalId,
        organization_id: OrganizationId,
    ) -> Result<HashSet<Role>, DirectoryError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT role FROM organization_members WHERE principal_id = $1 AND organization_id = $2",
        )
        .bind(principal_id)
        .bind(organization_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|role| match role.parse::<Role>() {
                Ok(role) => Some(role),
                Err(e) => {
                    warn!(principal_id = %principal_id, "Ignoring membership: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn members_with_role(
        &self,
        role: Role,
        organization_id: OrganizationId,
    ) -> Result<HashSet<PrincipalId>, DirectoryError> {
        let rows: Vec<PrincipalId> = sqlx::query_scalar(
            "SELECT principal_id FROM organization_members WHERE organization_id = $1 AND role = $2",
        )
        .bind(organization_id)
        .bind(role.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}
