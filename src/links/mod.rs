// ============================================
// Organization Link Request State Machine
// ============================================
//
// A link request is an intent to associate a subordinate organization
// with an enterprise-scoped workspace. Requests move PENDING →
// APPROVED/DENIED, or PENDING/PENDING_APPROVAL → CANCELED; terminal
// states are never revisited. Every transition that grows the
// linked-organization count re-validates quota against a snapshot read
// in the same transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::db::audit::{AuditEntry, AuditHandle};
use crate::error::ServiceError;
use crate::models::Workspace;
use crate::quota::{self, QuotaCheck, QuotaResource};

pub mod provision;
pub mod resolve;

use provision::{OrganizationProvisioner, OrganizationSignup};

// ============================================
// Status & Intent
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkRequestStatus {
    Pending,
    PendingApproval,
    Approved,
    Denied,
    Canceled,
}

impl LinkRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRequestStatus::Pending => "PENDING",
            LinkRequestStatus::PendingApproval => "PENDING_APPROVAL",
            LinkRequestStatus::Approved => "APPROVED",
            LinkRequestStatus::Denied => "DENIED",
            LinkRequestStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(LinkRequestStatus::Pending),
            "PENDING_APPROVAL" => Some(LinkRequestStatus::PendingApproval),
            "APPROVED" => Some(LinkRequestStatus::Approved),
            "DENIED" => Some(LinkRequestStatus::Denied),
            "CANCELED" => Some(LinkRequestStatus::Canceled),
            _ => None,
        }
    }

    /// Open requests still count toward linked-org quota and can be
    /// canceled.
    #[allow(dead_code)]
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            LinkRequestStatus::Pending | LinkRequestStatus::PendingApproval
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkRequestIntent {
    LinkExisting,
    CreateUnderEnterprise,
}

impl LinkRequestIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRequestIntent::LinkExisting => "LINK_EXISTING",
            LinkRequestIntent::CreateUnderEnterprise => "CREATE_UNDER_ENTERPRISE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LINK_EXISTING" => Some(LinkRequestIntent::LinkExisting),
            "CREATE_UNDER_ENTERPRISE" => Some(LinkRequestIntent::CreateUnderEnterprise),
            _ => None,
        }
    }
}

// ============================================
// Link Request row
// ============================================

const REQUEST_COLUMNS: &str = "id, enterprise_id, workspace_id, organization_id, requested_by, \
     request_identifier, message, intent, status, decided_at, decision_by_org_user_id, \
     canceled_at, created_at";

#[derive(Debug, Clone, Serialize)]
pub struct LinkRequest {
    pub id: Uuid,
    pub enterprise_id: Uuid,
    pub workspace_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub requested_by: String,
    pub request_identifier: String,
    pub message: Option<String>,
    pub intent: LinkRequestIntent,
    pub status: LinkRequestStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_by_org_user_id: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LinkRequest {
    fn from_row(row: &PgRow) -> Result<Self, ServiceError> {
        let status_raw: String = row.get("status");
        let intent_raw: String = row.get("intent");

        let status = LinkRequestStatus::parse(&status_raw).ok_or_else(|| {
            ServiceError::Internal(format!("unknown link request status '{}'", status_raw))
        })?;
        let intent = LinkRequestIntent::parse(&intent_raw).ok_or_else(|| {
            ServiceError::Internal(format!("unknown link request intent '{}'", intent_raw))
        })?;

        Ok(Self {
            id: row.get("id"),
            enterprise_id: row.get("enterprise_id"),
            workspace_id: row.get("workspace_id"),
            organization_id: row.get("organization_id"),
            requested_by: row.get("requested_by"),
            request_identifier: row.get("request_identifier"),
            message: row.get("message"),
            intent,
            status,
            decided_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("decided_at")
                .map(|dt| dt.and_utc()),
            decision_by_org_user_id: row.get("decision_by_org_user_id"),
            canceled_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("canceled_at")
                .map(|dt| dt.and_utc()),
            created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        })
    }
}

// ============================================
// Operation parameters
// ============================================

/// How the target organization is named in a LINK_EXISTING request.
#[derive(Debug, Clone)]
pub enum OrgIdentifier {
    /// Direct primary-key lookup, bypassing identifier resolution.
    Id(Uuid),
    /// Raw string resolved by email / slug / domain.
    Raw(String),
}

impl OrgIdentifier {
    fn raw_string(&self) -> String {
        match self {
            OrgIdentifier::Id(id) => id.to_string(),
            OrgIdentifier::Raw(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateLinkRequest {
    pub enterprise_id: Uuid,
    pub workspace_id: Uuid,
    pub requested_by: String,
    pub identifier: OrgIdentifier,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpawnOrganizationRequest {
    pub enterprise_id: Uuid,
    pub workspace_id: Uuid,
    pub requested_by: String,
    pub signup: OrganizationSignup,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LinkDecision {
    pub request_id: Uuid,
    pub organization_id: Uuid,
    pub actor_user_id: String,
}

// ============================================
// Create: LINK_EXISTING
// ============================================

/// Open a PENDING link request against an existing organization.
///
/// Idempotent on the (workspace, enterprise, organization) triple: if a
/// PENDING request already exists it is returned unchanged and no new row
/// is created.
pub async fn create_link_request(
    pool: &PgPool,
    audit: &AuditHandle,
    params: CreateLinkRequest,
) -> Result<LinkRequest, ServiceError> {
    let mut tx = pool.begin().await?;

    require_workspace_scoped(&mut tx, params.workspace_id, params.enterprise_id).await?;

    let organization = match &params.identifier {
        OrgIdentifier::Id(id) => resolve::resolve_organization_by_id(&mut tx, *id).await?,
        OrgIdentifier::Raw(s) => resolve::resolve_organization(&mut tx, s).await?,
    };

    if organization.id == params.enterprise_id {
        return Err(ServiceError::Validation(
            "an enterprise cannot request a link to itself".into(),
        ));
    }

    let already_linked = sqlx::query(
        r#"
        SELECT 1 AS present
        FROM workspace_organization_link
        WHERE workspace_id = $1 AND organization_id = $2
        "#,
    )
    .bind(params.workspace_id)
    .bind(organization.id)
    .fetch_optional(&mut *tx)
    .await?;

    if already_linked.is_some() {
        return Err(ServiceError::AlreadyLinked);
    }

    // Duplicate PENDING request: idempotent return, not an error.
    let existing = sqlx::query(&format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM organization_link_request
        WHERE workspace_id = $1 AND enterprise_id = $2 AND organization_id = $3
          AND status = 'PENDING'
        "#
    ))
    .bind(params.workspace_id)
    .bind(params.enterprise_id)
    .bind(organization.id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        return LinkRequest::from_row(&row);
    }

    let snapshot = quota::resolver::resolve_snapshot(&mut tx, params.enterprise_id).await?;
    quota::assert_available(
        &snapshot,
        QuotaResource::LinkedOrgs,
        QuotaCheck::linking(organization.id),
    )?;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO organization_link_request
            (enterprise_id, workspace_id, organization_id, requested_by,
             request_identifier, message, intent, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING')
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(params.enterprise_id)
    .bind(params.workspace_id)
    .bind(organization.id)
    .bind(&params.requested_by)
    .bind(params.identifier.raw_string())
    .bind(&params.message)
    .bind(LinkRequestIntent::LinkExisting.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let request = LinkRequest::from_row(&row)?;

    tx.commit().await?;

    audit.queue(
        AuditEntry::new("link_request.created", "link_request")
            .actor(&params.requested_by)
            .entity(request.id)
            .target(organization.id)
            .details(json!({
                "enterprise_id": params.enterprise_id,
                "workspace_id": params.workspace_id,
                "intent": request.intent.as_str(),
            })),
    );

    Ok(request)
}

// ============================================
// Create: CREATE_UNDER_ENTERPRISE
// ============================================

/// Spawn a brand-new organization under the enterprise and open a
/// PENDING_APPROVAL request for it.
///
/// The quota check runs before any organization is created; the spawned
/// organization is force-upgraded to the enterprise's paid tier and
/// inherits its plan end date.
pub async fn create_organization_under_enterprise(
    pool: &PgPool,
    provisioner: &dyn OrganizationProvisioner,
    audit: &AuditHandle,
    params: SpawnOrganizationRequest,
) -> Result<LinkRequest, ServiceError> {
    let enterprise = {
        let mut conn = pool.acquire().await?;

        require_workspace_scoped(&mut conn, params.workspace_id, params.enterprise_id).await?;

        let snapshot = quota::resolver::resolve_snapshot(&mut conn, params.enterprise_id).await?;
        quota::assert_available(&snapshot, QuotaResource::LinkedOrgs, QuotaCheck::default())?;

        let row = sqlx::query(
            r#"
            SELECT plan_tier, plan_expires_at
            FROM organization
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(params.enterprise_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ServiceError::NotFound("enterprise"))?;

        (
            row.get::<Option<String>, _>("plan_tier"),
            row.get::<Option<chrono::NaiveDateTime>, _>("plan_expires_at"),
        )
    };

    let provisioned = provisioner.provision(&params.signup).await?;
    let organization = provisioned.organization;

    let mut tx = pool.begin().await?;

    // Force-upgrade: the spawned org rides on the enterprise's plan.
    sqlx::query(
        r#"
        UPDATE organization
        SET plan_tier = $1, plan_status = 'active', plan_expires_at = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(&enterprise.0)
    .bind(enterprise.1)
    .bind(organization.id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO organization_link_request
            (enterprise_id, workspace_id, organization_id, requested_by,
             request_identifier, message, intent, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING_APPROVAL')
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(params.enterprise_id)
    .bind(params.workspace_id)
    .bind(organization.id)
    .bind(&params.requested_by)
    .bind(&params.signup.name)
    .bind(&params.message)
    .bind(LinkRequestIntent::CreateUnderEnterprise.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let request = LinkRequest::from_row(&row)?;

    tx.commit().await?;

    audit.queue(
        AuditEntry::new("link_request.organization_spawned", "link_request")
            .actor(&params.requested_by)
            .entity(request.id)
            .target(organization.id)
            .details(json!({
                "enterprise_id": params.enterprise_id,
                "workspace_id": params.workspace_id,
                "organization_name": organization.name,
                "site_id": provisioned.site.id,
            })),
    );

    Ok(request)
}

// ============================================
// Approve
// ============================================

/// Approve a PENDING request on behalf of the target organization.
///
/// Everything from the status re-check to the link creation runs in one
/// transaction: the request row and the enterprise organization row are
/// both locked so concurrent approvals against the same enterprise
/// serialize on the quota re-check, and a second approval of the same
/// request observes a non-PENDING status.
pub async fn approve_link_request(
    pool: &PgPool,
    audit: &AuditHandle,
    decision: LinkDecision,
) -> Result<LinkRequest, ServiceError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM organization_link_request
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(decision.request_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ServiceError::NotFound("link request"))?;

    let request = LinkRequest::from_row(&row)?;

    if request.organization_id != Some(decision.organization_id) {
        return Err(ServiceError::Authorization(
            "link request is addressed to a different organization".into(),
        ));
    }

    if request.status != LinkRequestStatus::Pending {
        return Err(ServiceError::AlreadyProcessed);
    }

    // Serialize concurrent approvals for the same enterprise on its
    // organization row before re-reading usage.
    sqlx::query("SELECT id FROM organization WHERE id = $1 FOR UPDATE")
        .bind(request.enterprise_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ServiceError::NotFound("enterprise"))?;

    let snapshot = quota::resolver::resolve_snapshot(&mut tx, request.enterprise_id).await?;
    quota::assert_available(
        &snapshot,
        QuotaResource::LinkedOrgs,
        QuotaCheck::linking(decision.organization_id),
    )?;

    let workspace_row = sqlx::query(
        r#"
        SELECT id, name, status, created_by, created_at
        FROM workspace
        WHERE id = $1
        "#,
    )
    .bind(request.workspace_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ServiceError::NotFound("workspace"))?;

    let workspace = Workspace::from_row(&workspace_row);
    if !workspace.is_active() {
        return Err(ServiceError::Unavailable(format!(
            "workspace '{}' is not active",
            workspace.name
        )));
    }

    // Create the realized link, or reuse one that already exists.
    let existing_link = sqlx::query(
        r#"
        SELECT id AS link_id
        FROM workspace_organization_link
        WHERE workspace_id = $1 AND organization_id = $2
        "#,
    )
    .bind(request.workspace_id)
    .bind(decision.organization_id)
    .fetch_optional(&mut *tx)
    .await?;

    if existing_link.is_none() {
        sqlx::query(
            r#"
            INSERT INTO workspace_organization_link (workspace_id, organization_id, linked_by)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(request.workspace_id)
        .bind(decision.organization_id)
        .bind(&decision.actor_user_id)
        .execute(&mut *tx)
        .await?;
    }

    let updated = sqlx::query(&format!(
        r#"
        UPDATE organization_link_request
        SET status = 'APPROVED', decided_at = NOW(), decision_by_org_user_id = $2
        WHERE id = $1 AND status = 'PENDING'
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(decision.request_id)
    .bind(&decision.actor_user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ServiceError::AlreadyProcessed)?;

    let approved = LinkRequest::from_row(&updated)?;

    tx.commit().await?;

    tracing::info!(
        request_id = %approved.id,
        enterprise_id = %approved.enterprise_id,
        organization_id = %decision.organization_id,
        "Link request approved"
    );

    audit.queue(
        AuditEntry::new("link_request.approved", "link_request")
            .actor(&decision.actor_user_id)
            .entity(approved.id)
            .target(decision.organization_id)
            .details(json!({
                "enterprise_id": approved.enterprise_id,
                "workspace_id": approved.workspace_id,
            }))
            .snapshot(json!({
                "linked_orgs_used": snapshot.usage.linked_orgs,
                "linked_orgs_limit": snapshot.limits.max_linked_orgs,
            })),
    );

    Ok(approved)
}

// ============================================
// Deny
// ============================================

pub async fn deny_link_request(
    pool: &PgPool,
    audit: &AuditHandle,
    decision: LinkDecision,
) -> Result<LinkRequest, ServiceError> {
    let updated = sqlx::query(&format!(
        r#"
        UPDATE organization_link_request
        SET status = 'DENIED', decided_at = NOW(), decision_by_org_user_id = $3
        WHERE id = $1 AND organization_id = $2 AND status = 'PENDING'
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(decision.request_id)
    .bind(decision.organization_id)
    .bind(&decision.actor_user_id)
    .fetch_optional(pool)
    .await?;

    let denied = match updated {
        Some(row) => LinkRequest::from_row(&row)?,
        None => {
            return Err(
                classify_missed_update(pool, decision.request_id, Some(decision.organization_id), None)
                    .await?,
            );
        }
    };

    audit.queue(
        AuditEntry::new("link_request.denied", "link_request")
            .actor(&decision.actor_user_id)
            .entity(denied.id)
            .target(decision.organization_id)
            .details(json!({ "enterprise_id": denied.enterprise_id })),
    );

    Ok(denied)
}

// ============================================
// Cancel
// ============================================

/// Cancel an open request. Only the requesting enterprise may cancel.
pub async fn cancel_link_request(
    pool: &PgPool,
    audit: &AuditHandle,
    request_id: Uuid,
    enterprise_id: Uuid,
    actor_user_id: &str,
) -> Result<LinkRequest, ServiceError> {
    let updated = sqlx::query(&format!(
        r#"
        UPDATE organization_link_request
        SET status = 'CANCELED', canceled_at = NOW()
        WHERE id = $1 AND enterprise_id = $2
          AND status IN ('PENDING', 'PENDING_APPROVAL')
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(enterprise_id)
    .fetch_optional(pool)
    .await?;

    let canceled = match updated {
        Some(row) => LinkRequest::from_row(&row)?,
        None => {
            return Err(classify_missed_update(pool, request_id, None, Some(enterprise_id)).await?);
        }
    };

    audit.queue(
        AuditEntry::new("link_request.canceled", "link_request")
            .actor(actor_user_id)
            .entity(canceled.id)
            .details(json!({ "enterprise_id": enterprise_id })),
    );

    Ok(canceled)
}

/// Work out why a filtered decision UPDATE matched no row: the request is
/// missing, addressed elsewhere, or already settled.
async fn classify_missed_update(
    pool: &PgPool,
    request_id: Uuid,
    expected_organization_id: Option<Uuid>,
    expected_enterprise_id: Option<Uuid>,
) -> Result<ServiceError, ServiceError> {
    let row = sqlx::query(&format!(
        "SELECT {REQUEST_COLUMNS} FROM organization_link_request WHERE id = $1"
    ))
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(ServiceError::NotFound("link request"));
    };
    let request = LinkRequest::from_row(&row)?;

    if let Some(org_id) = expected_organization_id {
        if request.organization_id != Some(org_id) {
            return Ok(ServiceError::Authorization(
                "link request is addressed to a different organization".into(),
            ));
        }
    }

    if let Some(enterprise_id) = expected_enterprise_id {
        if request.enterprise_id != enterprise_id {
            return Ok(ServiceError::Authorization(
                "link request belongs to a different enterprise".into(),
            ));
        }
    }

    Ok(ServiceError::AlreadyProcessed)
}

// ============================================
// Listings
// ============================================

/// Pending requests addressed to an organization, newest first.
pub async fn pending_requests_for_organization(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Vec<LinkRequest>, ServiceError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM organization_link_request
        WHERE organization_id = $1 AND status = 'PENDING'
        ORDER BY created_at DESC
        "#
    ))
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(LinkRequest::from_row).collect()
}

/// All requests for a (workspace, enterprise) pair, newest first.
pub async fn list_requests_for_workspace(
    pool: &PgPool,
    workspace_id: Uuid,
    enterprise_id: Uuid,
) -> Result<Vec<LinkRequest>, ServiceError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {REQUEST_COLUMNS}
        FROM organization_link_request
        WHERE workspace_id = $1 AND enterprise_id = $2
        ORDER BY created_at DESC
        "#
    ))
    .bind(workspace_id)
    .bind(enterprise_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(LinkRequest::from_row).collect()
}

// ============================================
// Shared guards
// ============================================

/// A workspace is scoped to an enterprise when a realized link to the
/// enterprise's own organization exists.
pub(crate) async fn require_workspace_scoped(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    enterprise_id: Uuid,
) -> Result<(), ServiceError> {
    sqlx::query("SELECT id FROM workspace WHERE id = $1")
        .bind(workspace_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ServiceError::NotFound("workspace"))?;

    let scoped = sqlx::query(
        r#"
        SELECT 1 AS present
        FROM workspace_organization_link
        WHERE workspace_id = $1 AND organization_id = $2
        "#,
    )
    .bind(workspace_id)
    .bind(enterprise_id)
    .fetch_optional(&mut *conn)
    .await?;

    if scoped.is_none() {
        return Err(ServiceError::Authorization(
            "workspace is not scoped to this enterprise".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            LinkRequestStatus::Pending,
            LinkRequestStatus::PendingApproval,
            LinkRequestStatus::Approved,
            LinkRequestStatus::Denied,
            LinkRequestStatus::Canceled,
        ] {
            assert_eq!(LinkRequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LinkRequestStatus::parse("bogus"), None);
    }

    #[test]
    fn only_pending_states_are_open() {
        assert!(LinkRequestStatus::Pending.is_open());
        assert!(LinkRequestStatus::PendingApproval.is_open());
        assert!(!LinkRequestStatus::Approved.is_open());
        assert!(!LinkRequestStatus::Denied.is_open());
        assert!(!LinkRequestStatus::Canceled.is_open());
    }

    #[test]
    fn intent_round_trips_through_strings() {
        for intent in [
            LinkRequestIntent::LinkExisting,
            LinkRequestIntent::CreateUnderEnterprise,
        ] {
            assert_eq!(LinkRequestIntent::parse(intent.as_str()), Some(intent));
        }
    }

    #[test]
    fn identifier_raw_string_preserves_the_lookup_key() {
        let id = Uuid::new_v4();
        assert_eq!(OrgIdentifier::Id(id).raw_string(), id.to_string());
        assert_eq!(
            OrgIdentifier::Raw("  acme.com ".into()).raw_string(),
            "acme.com"
        );
    }
}
