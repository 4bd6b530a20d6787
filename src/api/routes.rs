use axum::{
    Router,
    routing::{delete, get, post},
};

use super::AppState;
use super::{api_keys, auth, enterprise, link_requests, workspaces};

/// V1 API routes
///
/// ## Public Routes (no auth required)
/// - POST /auth/verify - Verify session token (used by the dashboard)
/// - POST /auth/api-key/verify - Verify API key
///
/// ## Enterprise (Session Required)
/// - GET  /enterprise - Current user's enterprise organization
/// - GET  /enterprise/usage - Quota usage vs. limits snapshot
///
/// ## Workspaces (Session Required)
/// - POST /workspaces - Create workspace (WORKSPACES quota)
/// - GET  /workspaces - List enterprise workspaces
/// - POST /workspaces/{workspace_id}/invites - Invite member (MEMBERS quota)
///
/// ## API Key Management (Session Required)
/// - POST   /workspaces/{workspace_id}/api-keys - Create API key (API_KEYS quota)
/// - GET    /workspaces/{workspace_id}/api-keys - List API keys
/// - DELETE /workspaces/{workspace_id}/api-keys/{key_id} - Revoke API key
///
/// ## Link Requests (Session Required)
/// - POST /link-requests - Request linking an existing organization (LINKED_ORGS quota)
/// - POST /link-requests/organizations - Spawn a new org under the enterprise
/// - POST /link-requests/{request_id}/approve - Approve on behalf of the target org
/// - POST /link-requests/{request_id}/deny - Deny on behalf of the target org
/// - POST /link-requests/{request_id}/cancel - Cancel an open request
/// - GET  /organizations/{organization_id}/link-requests - Recipient view (pending)
/// - GET  /workspaces/{workspace_id}/link-requests - Requester view (all)
///
/// ## Programmatic (API Key Required, rate limited)
/// - GET /workspace/usage - Quota usage for the key's workspace
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // ========================================
        // Public: Auth verification endpoints
        // ========================================
        .route("/auth/verify", post(auth::verify_session))
        .route("/auth/api-key/verify", post(auth::verify_api_key))
        // ========================================
        // Enterprise: Session auth (dashboard)
        // ========================================
        .route("/enterprise", get(enterprise::get_current_enterprise))
        .route("/enterprise/usage", get(enterprise::get_enterprise_usage))
        // ========================================
        // Workspaces: Session auth
        // ========================================
        .route("/workspaces", post(workspaces::create_workspace))
        .route("/workspaces", get(workspaces::list_workspaces))
        .route(
            "/workspaces/{workspace_id}/invites",
            post(workspaces::create_invite),
        )
        // ========================================
        // API Key Management: Session auth
        // ========================================
        .route(
            "/workspaces/{workspace_id}/api-keys",
            post(api_keys::create_api_key),
        )
        .route(
            "/workspaces/{workspace_id}/api-keys",
            get(api_keys::list_api_keys),
        )
        .route(
            "/workspaces/{workspace_id}/api-keys/{key_id}",
            delete(api_keys::revoke_api_key),
        )
        // ========================================
        // Link Requests: Session auth
        // ========================================
        .route("/link-requests", post(link_requests::create_link_request))
        .route(
            "/link-requests/organizations",
            post(link_requests::create_enterprise_organization),
        )
        .route(
            "/link-requests/{request_id}/approve",
            post(link_requests::approve_link_request),
        )
        .route(
            "/link-requests/{request_id}/deny",
            post(link_requests::deny_link_request),
        )
        .route(
            "/link-requests/{request_id}/cancel",
            post(link_requests::cancel_link_request),
        )
        .route(
            "/organizations/{organization_id}/link-requests",
            get(link_requests::list_pending_for_organization),
        )
        .route(
            "/workspaces/{workspace_id}/link-requests",
            get(link_requests::list_for_workspace),
        )
        // ========================================
        // Programmatic: API key auth (rate limited)
        // ========================================
        .route("/workspace/usage", get(enterprise::get_workspace_usage))
}
