use axum::{Json, http::StatusCode};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::db::audit::{AuditEntry, AuditHandle};
use crate::error::ServiceError;
use crate::links::provision::OrganizationProvisioner;
use crate::middleware::ErrorResponse;
use crate::middleware::auth::ApiKeyInfo;
use crate::middleware::rate_limit::RateLimiter;

pub mod api_keys;
pub mod auth;
pub mod enterprise;
pub mod health;
pub mod link_requests;
pub mod routes;
pub mod workspaces;

// ============================================
// Application State
// ============================================

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub audit: AuditHandle,
    /// Admission control keyed by API-key id.
    pub api_key_limiter: Arc<RateLimiter>,
    /// Admission control keyed by workspace id.
    pub workspace_limiter: Arc<RateLimiter>,
    pub provisioner: Arc<dyn OrganizationProvisioner>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        audit: AuditHandle,
        provisioner: Arc<dyn OrganizationProvisioner>,
    ) -> Self {
        Self {
            db,
            audit,
            api_key_limiter: Arc::new(RateLimiter::in_memory()),
            workspace_limiter: Arc::new(RateLimiter::in_memory()),
            provisioner,
        }
    }
}

// ============================================
// Error mapping
// ============================================

/// Map a service-layer error onto the transport response.
///
/// Quota conflicts carry limit/current so the dashboard can render
/// "X of Y used".
pub fn service_error_response(err: ServiceError) -> (StatusCode, Json<ErrorResponse>) {
    let status = err.status_code();

    let body = match &err {
        ServiceError::LimitReached(limit) => ErrorResponse {
            error: "LIMIT_REACHED".into(),
            message: Some(limit.message.clone()),
            resource: Some(limit.resource.as_str().into()),
            limit: Some(limit.limit),
            current: Some(limit.current),
            reset_in_ms: None,
        },
        ServiceError::Database(e) => {
            tracing::error!("Database error: {}", e);
            ErrorResponse::new("DB_ERROR", "Internal database error")
        }
        other => ErrorResponse::new(other.code(), other.to_string()),
    };

    (status, Json(body))
}

// ============================================
// Rate-limit enforcement
// ============================================

/// Check the API-key limiter, then the workspace limiter, in sequence.
/// Either rejecting blocks the request with a 429 carrying `reset_in_ms`.
/// Rejections queue a best-effort audit record; queueing cannot fail the
/// request.
pub fn enforce_rate_limits(
    state: &AppState,
    key: &ApiKeyInfo,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let key_decision = state.api_key_limiter.check(
        &key.id.to_string(),
        key.rate_limit_rpm.map(i64::from),
        key.burst_limit.map(i64::from),
    );

    if !key_decision.allowed {
        state.audit.queue(
            AuditEntry::new("rate_limit.rejected", "api_key")
                .entity(key.id)
                .details(json!({ "reset_in_ms": key_decision.reset_in_ms })),
        );
        return Err(rate_limited_response(key_decision.reset_in_ms));
    }

    let ws_decision = state
        .workspace_limiter
        .check(&key.workspace_id.to_string(), None, None);

    if !ws_decision.allowed {
        state.audit.queue(
            AuditEntry::new("rate_limit.rejected", "workspace")
                .entity(key.workspace_id)
                .details(json!({ "reset_in_ms": ws_decision.reset_in_ms })),
        );
        return Err(rate_limited_response(ws_decision.reset_in_ms));
    }

    Ok(())
}

fn rate_limited_response(reset_in_ms: u64) -> (StatusCode, Json<ErrorResponse>) {
    let mut body = ErrorResponse::new(
        "RATE_LIMITED",
        format!("Rate limit exceeded. Retry in {}ms.", reset_in_ms),
    );
    body.reset_in_ms = Some(reset_in_ms);
    (StatusCode::TOO_MANY_REQUESTS, Json(body))
}
