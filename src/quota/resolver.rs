// ============================================
// Quota Snapshot Resolver
// ============================================
//
// Reads an enterprise's limits and current usage into a QuotaSnapshot.
// Takes a plain connection so the approval path can run it inside the
// same transaction as the guarded mutation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::Organization;
use crate::models::organization::ORG_COLUMNS;
use crate::quota::{QuotaLimits, QuotaSnapshot, QuotaUsage};

/// Resolve a fresh snapshot of usage vs. limits for one enterprise.
///
/// Fails with NotFound if the enterprise organization does not exist.
/// Read-only; scans only workspaces currently associated with the
/// enterprise.
pub async fn resolve_snapshot(
    conn: &mut PgConnection,
    enterprise_id: Uuid,
) -> Result<QuotaSnapshot, ServiceError> {
    let limits_row = sqlx::query(
        r#"
        SELECT max_workspaces, max_linked_orgs, max_api_keys, max_members
        FROM organization
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(enterprise_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ServiceError::NotFound("enterprise"))?;

    let limits = QuotaLimits::normalize(
        limits_row
            .get::<Option<i32>, _>("max_workspaces")
            .map(f64::from),
        limits_row
            .get::<Option<i32>, _>("max_linked_orgs")
            .map(f64::from),
        limits_row
            .get::<Option<i32>, _>("max_api_keys")
            .map(f64::from),
        limits_row
            .get::<Option<i32>, _>("max_members")
            .map(f64::from),
    );

    // Workspaces owned by the enterprise are the ones linked to its own
    // organization id.
    let workspace_ids: Vec<Uuid> = sqlx::query(
        r#"
        SELECT workspace_id
        FROM workspace_organization_link
        WHERE organization_id = $1
        "#,
    )
    .bind(enterprise_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| row.get("workspace_id"))
    .collect();

    // Tracked linked organizations: realized links across those workspaces
    // (excluding the enterprise itself) unioned with orgs referenced by any
    // still-open link request. The union keeps a flood of pending requests
    // from being approved past the ceiling one by one.
    let mut tracked: HashSet<Uuid> = HashSet::new();

    if !workspace_ids.is_empty() {
        let linked = sqlx::query(
            r#"
            SELECT DISTINCT organization_id
            FROM workspace_organization_link
            WHERE workspace_id = ANY($1) AND organization_id <> $2
            "#,
        )
        .bind(&workspace_ids)
        .bind(enterprise_id)
        .fetch_all(&mut *conn)
        .await?;

        tracked.extend(linked.into_iter().map(|row| row.get::<Uuid, _>("organization_id")));
    }

    let open_request_orgs = sqlx::query(
        r#"
        SELECT DISTINCT organization_id
        FROM organization_link_request
        WHERE enterprise_id = $1
          AND status IN ('PENDING', 'PENDING_APPROVAL')
          AND organization_id IS NOT NULL
        "#,
    )
    .bind(enterprise_id)
    .fetch_all(&mut *conn)
    .await?;

    tracked.extend(
        open_request_orgs
            .into_iter()
            .map(|row| row.get::<Uuid, _>("organization_id")),
    );
    tracked.remove(&enterprise_id);

    let (api_keys, members) = if workspace_ids.is_empty() {
        (0, 0)
    } else {
        let api_keys: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM api_key
            WHERE workspace_id = ANY($1) AND revoked_at IS NULL
            "#,
        )
        .bind(&workspace_ids)
        .fetch_one(&mut *conn)
        .await?
        .get("count");

        // Members plus pending invitations count against the same ceiling.
        let members: i64 = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM workspace_member WHERE workspace_id = ANY($1))
              + (SELECT COUNT(*) FROM workspace_invite
                 WHERE workspace_id = ANY($1) AND status = 'PENDING') AS count
            "#,
        )
        .bind(&workspace_ids)
        .fetch_one(&mut *conn)
        .await?
        .get("count");

        (api_keys, members)
    };

    let usage = QuotaUsage {
        workspaces: workspace_ids.len() as i64,
        linked_orgs: tracked.len() as i64,
        api_keys,
        members,
    };

    Ok(QuotaSnapshot {
        enterprise_id,
        limits,
        usage,
        workspace_ids,
        tracked_linked_organization_ids: tracked,
    })
}

/// Map a workspace to its governing enterprise.
///
/// A workspace can be linked to several organizations; only one of them
/// owns the quota. Prefers an organization with an active enterprise-tier
/// plan, falls back to any organization merely tagged enterprise-tier.
pub async fn resolve_enterprise_for_workspace(
    conn: &mut PgConnection,
    workspace_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ORG_COLUMNS}
        FROM organization o
        JOIN workspace_organization_link l ON l.organization_id = o.id
        WHERE l.workspace_id = $1 AND o.deleted_at IS NULL
        "#
    ))
    .bind(workspace_id)
    .fetch_all(&mut *conn)
    .await?;

    let candidates: Vec<Organization> = rows.iter().map(Organization::from_row).collect();

    Ok(select_enterprise(&candidates, Utc::now()))
}

/// Pick the quota-owning enterprise among a workspace's linked
/// organizations.
fn select_enterprise(candidates: &[Organization], now: DateTime<Utc>) -> Option<Uuid> {
    if let Some(org) = candidates
        .iter()
        .find(|org| org.has_active_enterprise_plan(now))
    {
        return Some(org.id);
    }

    candidates
        .iter()
        .find(|org| org.is_enterprise_tier())
        .map(|org| org.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn org(tier: Option<&str>, plan_status: Option<&str>, expires_in_days: Option<i64>) -> Organization {
        let now = Utc::now();
        Organization {
            id: Uuid::new_v4(),
            name: "org".into(),
            slug: None,
            email: None,
            website: None,
            status: "approved".into(),
            restricted: false,
            deleted_at: None,
            plan_tier: tier.map(String::from),
            plan_status: plan_status.map(String::from),
            plan_expires_at: expires_in_days.map(|d| now + Duration::days(d)),
            created_at: now,
        }
    }

    #[test]
    fn prefers_active_enterprise_plan() {
        let tagged_only = org(Some("enterprise"), Some("expired"), None);
        let active = org(Some("enterprise"), Some("active"), Some(30));
        let candidates = vec![tagged_only, active.clone()];

        assert_eq!(select_enterprise(&candidates, Utc::now()), Some(active.id));
    }

    #[test]
    fn expired_plan_falls_back_to_tagged_tier() {
        let expired = org(Some("enterprise"), Some("active"), Some(-1));
        let candidates = vec![expired.clone()];

        // Expired plan fails the active check, but the tier tag still wins
        // the fallback.
        assert_eq!(select_enterprise(&candidates, Utc::now()), Some(expired.id));
    }

    #[test]
    fn restricted_org_is_not_an_active_enterprise() {
        let mut restricted = org(Some("enterprise"), Some("active"), Some(30));
        restricted.restricted = true;
        let plain = org(Some("team"), Some("active"), None);
        let candidates = vec![plain, restricted.clone()];

        // Restricted orgs fail the plan check but still carry the tier tag.
        assert_eq!(
            select_enterprise(&candidates, Utc::now()),
            Some(restricted.id)
        );
    }

    #[test]
    fn no_enterprise_among_candidates() {
        let candidates = vec![org(Some("team"), Some("active"), None), org(None, None, None)];
        assert_eq!(select_enterprise(&candidates, Utc::now()), None);
    }
}
