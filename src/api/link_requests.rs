use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use super::enterprise::get_user_enterprise_id;
use super::{AppState, service_error_response};
use crate::links::{
    self, CreateLinkRequest, LinkDecision, LinkRequest, OrgIdentifier, SpawnOrganizationRequest,
    provision::OrganizationSignup,
};
use crate::middleware::auth::require_org_member;
use crate::middleware::{ErrorResponse, require_session_from_headers};
use crate::quota::resolver;

// ============================================
// Request/Response Types
// ============================================

/// How the `identifier` field should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveMethod {
    /// Email, slug, or domain resolution.
    #[default]
    Identifier,
    /// `identifier` is the organization's UUID.
    OrgId,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLinkRequestPayload {
    pub workspace_id: Uuid,
    #[validate(length(min = 1, max = 300))]
    pub identifier: String,
    #[serde(default)]
    pub method: ResolveMethod,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SpawnOrganizationPayload {
    pub workspace_id: Uuid,
    #[validate(nested)]
    pub signup: OrganizationSignup,
    #[validate(length(max = 1000))]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionPayload {
    pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct LinkRequestListResponse {
    pub requests: Vec<LinkRequest>,
}

// ============================================
// Helpers
// ============================================

/// Resolve the enterprise governing a workspace and check that the
/// session user is a member of it.
async fn require_enterprise_for_workspace(
    state: &AppState,
    user_id: &str,
    workspace_id: Uuid,
) -> Result<Uuid, (StatusCode, Json<ErrorResponse>)> {
    let mut conn = state.db.acquire().await.map_err(db_error)?;

    let enterprise_id = resolver::resolve_enterprise_for_workspace(&mut conn, workspace_id)
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

    require_org_member(&state.db, user_id, enterprise_id).await?;

    Ok(enterprise_id)
}

fn validation_error(e: validator::ValidationErrors) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("VALIDATION", e.to_string())),
    )
}

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Database error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("DB_ERROR", "Internal database error")),
    )
}

// ============================================
// Handlers
// ============================================

/// Request a link between a workspace and an existing organization
///
/// **Auth: Session Required**
pub async fn create_link_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateLinkRequestPayload>,
) -> Result<Json<LinkRequest>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    req.validate().map_err(validation_error)?;

    let enterprise_id =
        require_enterprise_for_workspace(&state, &user.user_id, req.workspace_id).await?;

    let identifier = match req.method {
        ResolveMethod::OrgId => {
            let id = req.identifier.trim().parse::<Uuid>().map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse::new(
                        "VALIDATION",
                        "identifier is not a valid organization id",
                    )),
                )
            })?;
            OrgIdentifier::Id(id)
        }
        ResolveMethod::Identifier => OrgIdentifier::Raw(req.identifier.clone()),
    };

    let request = links::create_link_request(
        &state.db,
        &state.audit,
        CreateLinkRequest {
            enterprise_id,
            workspace_id: req.workspace_id,
            requested_by: user.user_id,
            identifier,
            message: req.message,
        },
    )
    .await
    .map_err(service_error_response)?;

    Ok(Json(request))
}

/// Spawn a new organization under the enterprise and open an approval
/// request for it
///
/// **Auth: Session Required**
pub async fn create_enterprise_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SpawnOrganizationPayload>,
) -> Result<Json<LinkRequest>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    req.validate().map_err(validation_error)?;

    let enterprise_id =
        require_enterprise_for_workspace(&state, &user.user_id, req.workspace_id).await?;

    let request = links::create_organization_under_enterprise(
        &state.db,
        state.provisioner.as_ref(),
        &state.audit,
        SpawnOrganizationRequest {
            enterprise_id,
            workspace_id: req.workspace_id,
            requested_by: user.user_id,
            signup: req.signup,
            message: req.message,
        },
    )
    .await
    .map_err(service_error_response)?;

    Ok(Json(request))
}

/// Approve a pending link request on behalf of the target organization
///
/// **Auth: Session Required** (member of the target organization)
pub async fn approve_link_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(req): Json<DecisionPayload>,
) -> Result<Json<LinkRequest>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_org_member(&state.db, &user.user_id, req.organization_id).await?;

    let request = links::approve_link_request(
        &state.db,
        &state.audit,
        LinkDecision {
            request_id,
            organization_id: req.organization_id,
            actor_user_id: user.user_id,
        },
    )
    .await
    .map_err(service_error_response)?;

    Ok(Json(request))
}

/// Deny a pending link request on behalf of the target organization
///
/// **Auth: Session Required** (member of the target organization)
pub async fn deny_link_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(req): Json<DecisionPayload>,
) -> Result<Json<LinkRequest>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_org_member(&state.db, &user.user_id, req.organization_id).await?;

    let request = links::deny_link_request(
        &state.db,
        &state.audit,
        LinkDecision {
            request_id,
            organization_id: req.organization_id,
            actor_user_id: user.user_id,
        },
    )
    .await
    .map_err(service_error_response)?;

    Ok(Json(request))
}

/// Cancel an open link request
///
/// **Auth: Session Required** (member of the requesting enterprise)
pub async fn cancel_link_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> Result<Json<LinkRequest>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id = get_user_enterprise_id(&state.db, &user.user_id).await?;

    let request = links::cancel_link_request(
        &state.db,
        &state.audit,
        request_id,
        enterprise_id,
        &user.user_id,
    )
    .await
    .map_err(service_error_response)?;

    Ok(Json(request))
}

/// Pending link requests addressed to an organization, newest first
///
/// **Auth: Session Required** (member of the organization)
pub async fn list_pending_for_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<Uuid>,
) -> Result<Json<LinkRequestListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    require_org_member(&state.db, &user.user_id, organization_id).await?;

    let requests = links::pending_requests_for_organization(&state.db, organization_id)
        .await
        .map_err(service_error_response)?;

    Ok(Json(LinkRequestListResponse { requests }))
}

/// All link requests for a workspace, newest first
///
/// **Auth: Session Required** (member of the governing enterprise)
pub async fn list_for_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<LinkRequestListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user = require_session_from_headers(&state.db, &headers).await?;
    let enterprise_id =
        require_enterprise_for_workspace(&state, &user.user_id, workspace_id).await?;

    let requests = links::list_requests_for_workspace(&state.db, workspace_id, enterprise_id)
        .await
        .map_err(service_error_response)?;

    Ok(Json(LinkRequestListResponse { requests }))
}
