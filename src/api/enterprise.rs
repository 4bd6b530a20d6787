use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use super::{AppState, enforce_rate_limits, service_error_response};
use crate::middleware::{ErrorResponse, require_api_key_from_headers, require_session_from_headers};
use crate::quota::{QuotaLimits, QuotaUsage, resolver};

// ============================================
// Response Types
// ============================================

#[derive(Debug, Serialize)]
pub struct EnterpriseResponse {
    pub id: Uuid,
    pub name: String,
    pub slug: Option<String>,
    pub plan_tier: Option<String>,
    pub plan_status: Option<String>,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub limits: QuotaLimits,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EnterpriseUsageResponse {
    pub enterprise_id: Uuid,
    pub limits: QuotaLimits,
    pub usage: QuotaUsage,
    pub workspace_count: usize,
    pub tracked_linked_organizations: usize,
}

// ============================================
// Helpers
// ============================================

/// The enterprise the session user acts for: their organization
/// membership filtered to enterprise-tier organizations.
pub(super) async fn get_user_enterprise_id(
    db: &sqlx::PgPool,
    user_id: &str,
) -> Result<Uuid, (StatusCode, Json<ErrorResponse>)> {
    let row = sqlx::query(
        r#"
        SELECT om.organization_id
        FROM organization_member om
        JOIN organization o ON o.id = om.organization_id
        WHERE om.user_id = $1
          AND o.plan_tier = 'enterprise'
          AND o.deleted_at IS NULL
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(
                "DB_ERROR",
                format!("Database error: {}", e),
            )),
        )
    })?;

    match row {
        Some(r) => Ok(r.get("organization_id")),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "ENTERPRISE_NOT_FOUND",
                "No enterprise organization found for this user",
            )),
        )),
    }
}

// ============================================
// Handlers
// ============================================

/// Get the session user's enterprise organization
///
/// **Auth: Session Required**
pub async fn get_current_enterprise(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EnterpriseResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let row = sqlx::query(
        r#"
        SELECT id, name, slug, plan_tier, plan_status, plan_expires_at,
               max_workspaces, max_linked_orgs, max_api_keys, max_members, created_at
        FROM organization
        WHERE id = $1
        "#,
    )
    .bind(enterprise_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to load enterprise: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_ERROR", "Failed to load enterprise")),
        )
    })?;

    let limits = QuotaLimits::normalize(
        row.get::<Option<i32>, _>("max_workspaces").map(f64::from),
        row.get::<Option<i32>, _>("max_linked_orgs").map(f64::from),
        row.get::<Option<i32>, _>("max_api_keys").map(f64::from),
        row.get::<Option<i32>, _>("max_members").map(f64::from),
    );

    Ok(Json(EnterpriseResponse {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        plan_tier: row.get("plan_tier"),
        plan_status: row.get("plan_status"),
        plan_expires_at: row
            .get::<Option<chrono::NaiveDateTime>, _>("plan_expires_at")
            .map(|dt| dt.and_utc()),
        limits,
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
    }))
}

/// Get current quota usage for the session user's enterprise
///
/// **Auth: Session Required**
pub async fn get_enterprise_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EnterpriseUsageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let mut conn = state.db.acquire().await.map_err(|e| {
        tracing::error!("Failed to acquire connection: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_ERROR", "Failed to get usage data")),
        )
    })?;

    let snapshot = resolver::resolve_snapshot(&mut conn, enterprise_id)
        .await
        .map_err(service_error_response)?;

    Ok(Json(EnterpriseUsageResponse {
        enterprise_id: snapshot.enterprise_id,
        limits: snapshot.limits,
        usage: snapshot.usage,
        workspace_count: snapshot.workspace_ids.len(),
        tracked_linked_organizations: snapshot.tracked_linked_organization_ids.len(),
    }))
}

/// Quota usage for the workspace an API key belongs to. Programmatic
/// counterpart of the dashboard usage endpoint.
///
/// **Auth: API Key Required** (rate limited)
pub async fn get_workspace_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EnterpriseUsageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let key = require_api_key_from_headers(&state.db, &headers).await?;
    enforce_rate_limits(&state, &key)?;

    let mut conn = state.db.acquire().await.map_err(|e| {
        tracing::error!("Failed to acquire connection: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_ERROR", "Failed to get usage data")),
        )
    })?;

    let enterprise_id = resolver::resolve_enterprise_for_workspace(&mut conn, key.workspace_id)
        .await
        .map_err(service_error_response)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(
                    "ENTERPRISE_NOT_FOUND",
                    "Workspace is not governed by an enterprise",
                )),
            )
        })?;

    let snapshot = resolver::resolve_snapshot(&mut conn, enterprise_id)
        .await
        .map_err(service_error_response)?;

    Ok(Json(EnterpriseUsageResponse {
        enterprise_id: snapshot.enterprise_id,
        limits: snapshot.limits,
        usage: snapshot.usage,
        workspace_count: snapshot.workspace_ids.len(),
        tracked_linked_organizations: snapshot.tracked_linked_organization_ids.len(),
    }))
}
