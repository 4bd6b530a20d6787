use axum::{
    Json,
    http::{StatusCode, header},
};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::utils::hash_api_key;

#[derive(Debug, Clone)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub rate_limit_rpm: Option<i32>,
    pub burst_limit: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub session_id: String,
}

/// Standard error body: a machine-readable tag plus a human-readable
/// message, with quota and rate-limit context when applicable.
#[derive(Serialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_in_ms: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
            resource: None,
            limit: None,
            current: None,
            reset_in_ms: None,
        }
    }
}

async fn validate_api_key(pool: &PgPool, api_key: &str) -> Result<ApiKeyInfo, String> {
    let key_hash = hash_api_key(api_key);

    let result = sqlx::query(
        r#"
        SELECT
            ak.id,
            ak.workspace_id,
            ak.rate_limit_rpm,
            ak.burst_limit
        FROM api_key ak
        WHERE ak.key_hash = $1
          AND (ak.expires_at IS NULL OR ak.expires_at > NOW())
          AND ak.revoked_at IS NULL
        "#,
    )
    .bind(&key_hash)
    .fetch_optional(pool)
    .await;

    match result {
        Ok(Some(row)) => {
            use sqlx::Row;
            Ok(ApiKeyInfo {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                rate_limit_rpm: row.get("rate_limit_rpm"),
                burst_limit: row.get("burst_limit"),
            })
        }
        Ok(None) => Err("Invalid API key".to_string()),
        Err(e) => Err(format!("Database error: {}", e)),
    }
}

async fn validate_session(db: &PgPool, token: &str) -> Result<AuthenticatedUser, String> {
    let result = sqlx::query(
        r#"
        SELECT
            s.id as session_id,
            s.user_id,
            u.email,
            u.name
        FROM session s
        JOIN "user" u ON s.user_id = u.id
        WHERE s.token = $1
          AND s.expires_at > NOW()
        "#,
    )
    .bind(token)
    .fetch_optional(db)
    .await;

    match result {
        Ok(Some(row)) => {
            use sqlx::Row;
            Ok(AuthenticatedUser {
                session_id: row.get("session_id"),
                user_id: row.get("user_id"),
                email: row.get("email"),
                name: row.get("name"),
            })
        }
        Ok(None) => Err("Invalid or expired session".to_string()),
        Err(e) => Err(format!("Database error: {}", e)),
    }
}

pub async fn require_session_from_headers(
    db: &PgPool,
    headers: &axum::http::HeaderMap,
) -> Result<AuthenticatedUser, (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "SESSION_REQUIRED",
                    "Session token required. Please log in.",
                )),
            ));
        }
    };

    validate_session(db, token).await.map_err(|err| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("SESSION_INVALID", err)),
        )
    })
}

pub async fn require_api_key_from_headers(
    db: &PgPool,
    headers: &axum::http::HeaderMap,
) -> Result<ApiKeyInfo, (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        });

    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "API_KEY_REQUIRED",
                    "API key required. Use X-API-Key header or Authorization: Bearer <key>",
                )),
            ));
        }
    };

    validate_api_key(db, token).await.map_err(|err| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("API_KEY_INVALID", err)),
        )
    })
}

/// Require that the session user is a member of the given organization.
/// Used by the approve/deny endpoints, where the actor acts on behalf of
/// the recipient organization.
pub async fn require_org_member(
    db: &PgPool,
    user_id: &str,
    organization_id: Uuid,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let row = sqlx::query(
        r#"
        SELECT 1 AS present
        FROM organization_member
        WHERE organization_id = $1 AND user_id = $2
        "#,
    )
    .bind(organization_id)
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

    if row.is_none() {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                "FORBIDDEN",
                "You are not a member of this organization",
            )),
        ));
    }

    Ok(())
}
