use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;
use validator::Validate;

use super::enterprise::get_user_enterprise_id;
use super::{AppState, service_error_response};
use crate::db::audit::AuditEntry;
use crate::links;
use crate::middleware::{ErrorResponse, require_session_from_headers};
use crate::models::Workspace;
use crate::quota::{self, QuotaCheck, QuotaResource, resolver};

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkspaceRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<Workspace> for WorkspaceResponse {
    fn from(ws: Workspace) -> Self {
        Self {
            id: ws.id,
            name: ws.name,
            status: ws.status,
            created_by: ws.created_by,
            created_at: ws.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListWorkspacesResponse {
    pub workspaces: Vec<WorkspaceResponse>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInviteRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub email: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Handlers
// ============================================

/// Create a workspace under the session user's enterprise
///
/// **Auth: Session Required**
pub async fn create_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<Json<WorkspaceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    req.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("VALIDATION", e.to_string())),
        )
    })?;

    let mut tx = state.db.begin().await.map_err(db_error)?;

    // Serialize workspace-quota checks for this enterprise.
    sqlx::query("SELECT id FROM organization WHERE id = $1 FOR UPDATE")
        .bind(enterprise_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

    let snapshot = resolver::resolve_snapshot(&mut tx, enterprise_id)
        .await
        .map_err(service_error_response)?;
    quota::assert_available(&snapshot, QuotaResource::Workspaces, QuotaCheck::default())
        .map_err(|e| service_error_response(e.into()))?;

    let row = sqlx::query(
        r#"
        INSERT INTO workspace (name, created_by)
        VALUES ($1, $2)
        RETURNING id, name, status, created_by, created_at
        "#,
    )
    .bind(&req.name)
    .bind(&user.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;

    let workspace = Workspace::from_row(&row);

    // Ownership is the link to the enterprise's own organization.
    sqlx::query(
        r#"
        INSERT INTO workspace_organization_link (workspace_id, organization_id, linked_by)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(workspace.id)
    .bind(enterprise_id)
    .bind(&user.user_id)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    state.audit.queue(
        AuditEntry::new("workspace.created", "workspace")
            .actor(&user.user_id)
            .entity(workspace.id)
            .details(json!({ "enterprise_id": enterprise_id, "name": workspace.name })),
    );

    Ok(Json(workspace.into()))
}

/// List the enterprise's workspaces, newest first
///
/// **Auth: Session Required**
pub async fn list_workspaces(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListWorkspacesResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let rows = sqlx::query(
        r#"
        SELECT w.id, w.name, w.status, w.created_by, w.created_at
        FROM workspace w
        JOIN workspace_organization_link l ON l.workspace_id = w.id
        WHERE l.organization_id = $1
        ORDER BY w.created_at DESC
        "#,
    )
    .bind(enterprise_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list workspaces: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_ERROR", "Failed to list workspaces")),
        )
    })?;

    let workspaces = rows
        .iter()
        .map(|row| WorkspaceResponse::from(Workspace::from_row(row)))
        .collect();

    Ok(Json(ListWorkspacesResponse { workspaces }))
}

/// Invite a member into a workspace. Pending invitations count toward
/// the enterprise's member quota.
///
/// **Auth: Session Required**
pub async fn create_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateInviteRequest>,
) -> Result<Json<InviteResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    req.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("VALIDATION", e.to_string())),
        )
    })?;

    if req.email.eq_ignore_ascii_case(&user.email) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "VALIDATION",
                "You cannot invite yourself",
            )),
        ));
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;

    links::require_workspace_scoped(&mut tx, workspace_id, enterprise_id)
        .await
        .map_err(service_error_response)?;

    sqlx::query("SELECT id FROM organization WHERE id = $1 FOR UPDATE")
        .bind(enterprise_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

    let snapshot = resolver::resolve_snapshot(&mut tx, enterprise_id)
        .await
        .map_err(service_error_response)?;
    quota::assert_available(&snapshot, QuotaResource::Members, QuotaCheck::default())
        .map_err(|e| service_error_response(e.into()))?;

    let row = sqlx::query(
        r#"
        INSERT INTO workspace_invite (workspace_id, email, invited_by)
        VALUES ($1, $2, $3)
        RETURNING id, workspace_id, email, status, created_at
        "#,
    )
    .bind(workspace_id)
    .bind(&req.email)
    .bind(&user.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;

    let invite = InviteResponse {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        email: row.get("email"),
        status: row.get("status"),
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
    };

    tx.commit().await.map_err(db_error)?;

    state.audit.queue(
        AuditEntry::new("workspace.invite_created", "workspace_invite")
            .actor(&user.user_id)
            .entity(invite.id)
            .target(workspace_id)
            .details(json!({ "enterprise_id": enterprise_id })),
    );

    Ok(Json(invite))
}

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("DB_ERROR", "Internal database error")),
    )
}
