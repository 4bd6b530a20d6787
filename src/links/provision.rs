// ============================================
// Organization Provisioning Collaborator
// ============================================
//
// Spawning an organization under an enterprise delegates the actual
// signup to a provisioner so the state machine stays decoupled from
// business-registration mechanics.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use validator::Validate;

use crate::error::ServiceError;
use crate::models::Organization;
use crate::models::organization::{ORG_COLUMNS, STATUS_APPROVED, Site};

/// Signup parameters for a new organization.
#[derive(Debug, Clone, serde::Deserialize, Validate)]
pub struct OrganizationSignup {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(url)]
    pub website: Option<String>,
    pub slug: Option<String>,
    /// Name for the associated site record; defaults to the organization
    /// name.
    pub site_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProvisionedOrganization {
    pub organization: Organization,
    pub site: Site,
}

/// Creates a new organization and its associated site record.
#[async_trait]
pub trait OrganizationProvisioner: Send + Sync {
    async fn provision(
        &self,
        signup: &OrganizationSignup,
    ) -> Result<ProvisionedOrganization, ServiceError>;
}

// ============================================
// Default Postgres-backed implementation
// ============================================

pub struct PgOrganizationProvisioner {
    pool: PgPool,
}

impl PgOrganizationProvisioner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationProvisioner for PgOrganizationProvisioner {
    async fn provision(
        &self,
        signup: &OrganizationSignup,
    ) -> Result<ProvisionedOrganization, ServiceError> {
        signup
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        // Enterprise-spawned organizations skip the public review queue.
        let org_row = sqlx::query(&format!(
            r#"
            INSERT INTO organization (name, slug, email, website, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORG_COLUMNS}
            "#
        ))
        .bind(&signup.name)
        .bind(&signup.slug)
        .bind(&signup.email)
        .bind(&signup.website)
        .bind(STATUS_APPROVED)
        .fetch_one(&mut *tx)
        .await?;

        let organization = Organization::from_row(&org_row);

        let site_name = signup.site_name.as_deref().unwrap_or(&signup.name);
        let site_row = sqlx::query(
            r#"
            INSERT INTO site (organization_id, name, domain)
            VALUES ($1, $2, $3)
            RETURNING id, organization_id, name, domain, created_at
            "#,
        )
        .bind(organization.id)
        .bind(site_name)
        .bind(&signup.website)
        .fetch_one(&mut *tx)
        .await?;

        let site = Site {
            id: site_row.get("id"),
            organization_id: site_row.get("organization_id"),
            name: site_row.get("name"),
            domain: site_row.get("domain"),
            created_at: site_row
                .get::<chrono::NaiveDateTime, _>("created_at")
                .and_utc(),
        };

        tx.commit().await?;

        tracing::info!(
            organization_id = %organization.id,
            "Provisioned organization '{}'",
            organization.name
        );

        Ok(ProvisionedOrganization { organization, site })
    }
}
