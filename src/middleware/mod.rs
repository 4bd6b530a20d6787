pub mod auth;
pub mod rate_limit;

pub use auth::{ErrorResponse, require_api_key_from_headers, require_session_from_headers};
