use axum::http::StatusCode;

use crate::quota::LimitReachedError;

/// Errors raised by the quota, link-request, and workspace services.
///
/// Callers discriminate on the variant, never on message text. The HTTP
/// layer maps each variant to a status code and machine-readable tag via
/// [`ServiceError::status_code`] and [`ServiceError::code`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    LimitReached(#[from] LimitReachedError),

    #[error("link request already processed")]
    AlreadyProcessed,

    #[error("organization is already linked to this workspace")]
    AlreadyLinked,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    AmbiguousMatch(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::AmbiguousMatch(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::LimitReached(_)
            | ServiceError::AlreadyProcessed
            | ServiceError::AlreadyLinked
            | ServiceError::Unavailable(_) => StatusCode::CONFLICT,
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable tag for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION",
            ServiceError::Authorization(_) => "FORBIDDEN",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::LimitReached(_) => "LIMIT_REACHED",
            ServiceError::AlreadyProcessed => "ALREADY_PROCESSED",
            ServiceError::AlreadyLinked => "ALREADY_LINKED",
            ServiceError::Unavailable(_) => "WORKSPACE_UNAVAILABLE",
            ServiceError::AmbiguousMatch(_) => "AMBIGUOUS_MATCH",
            ServiceError::Database(_) => "DB_ERROR",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaResource, LimitReachedError};

    #[test]
    fn limit_reached_maps_to_conflict() {
        let err = ServiceError::from(LimitReachedError::new(QuotaResource::LinkedOrgs, 3, 3));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "LIMIT_REACHED");
    }

    #[test]
    fn ambiguous_match_is_a_client_error() {
        let err = ServiceError::AmbiguousMatch("several organizations matched".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "AMBIGUOUS_MATCH");
    }

    #[test]
    fn already_processed_is_a_conflict() {
        assert_eq!(
            ServiceError::AlreadyProcessed.status_code(),
            StatusCode::CONFLICT
        );
    }
}
