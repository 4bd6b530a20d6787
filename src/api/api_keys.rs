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
use crate::quota::{self, QuotaCheck, QuotaResource, resolver};
use crate::utils::{generate_api_key, hash_api_key};

// ============================================
// Request/Response Types
// ============================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Optional per-minute rate limit override for this key.
    pub rate_limit_rpm: Option<i32>,
    /// Optional burst (5s) limit override for this key.
    pub burst_limit: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,
    /// The full key, returned exactly once at creation time.
    pub key: String,
    pub prefix: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyItem {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub rate_limit_rpm: Option<i32>,
    pub burst_limit: Option<i32>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub keys: Vec<ApiKeyItem>,
}

#[derive(Debug, Serialize)]
pub struct RevokeApiKeyResponse {
    pub success: bool,
}

// ============================================
// Handlers
// ============================================

/// Create a new API key for a workspace. Counts toward the enterprise's
/// API-key quota.
///
/// **Auth: Session Required**
pub async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<Json<CreateApiKeyResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    req.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("VALIDATION", e.to_string())),
        )
    })?;

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
    quota::assert_available(&snapshot, QuotaResource::ApiKeys, QuotaCheck::default())
        .map_err(|e| service_error_response(e.into()))?;

    let (key, prefix) = generate_api_key();
    let key_hash = hash_api_key(&key);

    let row = sqlx::query(
        r#"
        INSERT INTO api_key
            (workspace_id, name, key_prefix, key_hash, rate_limit_rpm, burst_limit, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, created_at
        "#,
    )
    .bind(workspace_id)
    .bind(&req.name)
    .bind(&prefix)
    .bind(&key_hash)
    .bind(req.rate_limit_rpm)
    .bind(req.burst_limit)
    .bind(&user.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create API key: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_INSERT_FAILED", "Failed to create API key")),
        )
    })?;

    let id: Uuid = row.get("id");
    let created_at: chrono::NaiveDateTime = row.get("created_at");

    tx.commit().await.map_err(db_error)?;

    state.audit.queue(
        AuditEntry::new("api_key.created", "api_key")
            .actor(&user.user_id)
            .entity(id)
            .target(workspace_id)
            .details(json!({ "enterprise_id": enterprise_id, "name": req.name })),
    );

    Ok(Json(CreateApiKeyResponse {
        id,
        key,
        prefix,
        name: req.name,
        created_at: created_at.and_utc(),
    }))
}

/// List active API keys for a workspace
///
/// **Auth: Session Required**
pub async fn list_api_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<ListApiKeysResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let mut conn = state.db.acquire().await.map_err(db_error)?;
    links::require_workspace_scoped(&mut conn, workspace_id, enterprise_id)
        .await
        .map_err(service_error_response)?;

    let rows = sqlx::query(
        r#"
        SELECT id, workspace_id, name, key_prefix, rate_limit_rpm, burst_limit,
               last_used_at, expires_at, created_by, created_at
        FROM api_key
        WHERE workspace_id = $1 AND revoked_at IS NULL
        ORDER BY created_at DESC
        "#,
    )
    .bind(workspace_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list API keys: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_QUERY_FAILED", "Failed to list API keys")),
        )
    })?;

    let keys: Vec<ApiKeyItem> = rows
        .into_iter()
        .map(|row| ApiKeyItem {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            name: row.get("name"),
            key_prefix: row.get("key_prefix"),
            rate_limit_rpm: row.get("rate_limit_rpm"),
            burst_limit: row.get("burst_limit"),
            last_used_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("last_used_at")
                .map(|dt| dt.and_utc()),
            expires_at: row
                .get::<Option<chrono::NaiveDateTime>, _>("expires_at")
                .map(|dt| dt.and_utc()),
            created_by: row.get("created_by"),
            created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        })
        .collect();

    Ok(Json(ListApiKeysResponse { keys }))
}

/// Revoke an API key
///
/// **Auth: Session Required**
pub async fn revoke_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workspace_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RevokeApiKeyResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let mut conn = state.db.acquire().await.map_err(db_error)?;
    links::require_workspace_scoped(&mut conn, workspace_id, enterprise_id)
        .await
        .map_err(service_error_response)?;

    let result = sqlx::query(
        r#"
        UPDATE api_key
        SET revoked_at = NOW()
        WHERE id = $1 AND workspace_id = $2 AND revoked_at IS NULL
        "#,
    )
    .bind(key_id)
    .bind(workspace_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!("Failed to revoke API key: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("DB_UPDATE_FAILED", "Failed to revoke API key")),
        )
    })?;

    let revoked = result.rows_affected() > 0;
    if revoked {
        state.audit.queue(
            AuditEntry::new("api_key.revoked", "api_key")
                .actor(&user.user_id)
                .entity(key_id)
                .target(workspace_id),
        );
    }

    Ok(Json(RevokeApiKeyResponse { success: revoked }))
}

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("DB_ERROR", "Internal database error")),
    )
}
