use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use super::cookies::clear_session_cookie;
use crate::error::SecurityError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ValidationError(String),

    InternalError(String),

    Unauthorized(String),

    /// The session is gone for good; the cookie is cleared.
    SessionEnded,

    Forbidden(String),

    /// Refresh lost a benign race; the cookie is left alone.
    Conflict(String),

    TooManyRequests { retry_after_secs: u64 },

    Locked { remaining_ms: i64 },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::SessionEnded => write!(f, "Session ended"),
            Self::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::TooManyRequests { retry_after_secs } => {
                write!(f, "Too many requests, retry after {retry_after_secs}s")
            }
            Self::Locked { remaining_ms } => write!(f, "Locked for {remaining_ms}ms"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::SessionEnded => (
                StatusCode::UNAUTHORIZED,
                "Please sign in again".to_string(),
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts, please try again later".to_string(),
            ),
            Self::Locked { .. } => (
                StatusCode::LOCKED,
                "Account is temporarily locked, please try again later".to_string(),
            ),
        };

        let body = ApiResponse::<()>::error(error_message);
        let mut response = (status, Json(body)).into_response();

        match self {
            Self::SessionEnded => {
                response
                    .headers_mut()
                    .append(header::SET_COOKIE, clear_session_cookie());
            }
            Self::TooManyRequests { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            }
            _ => {}
        }

        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(format!("{err:#}"))
    }
}

impl From<SecurityError> for ApiError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::RateLimited { retry_after_secs } => {
                Self::TooManyRequests { retry_after_secs }
            }
            SecurityError::AccountLocked { remaining_ms } => Self::Locked { remaining_ms },
            SecurityError::CsrfInvalid | SecurityError::Forbidden => {
                Self::Forbidden(err.to_string())
            }
            SecurityError::InvalidCredentials => Self::Unauthorized(err.to_string()),
            SecurityError::RefreshInProgress => Self::Conflict(err.to_string()),
            SecurityError::InvalidResetToken => Self::ValidationError(err.to_string()),
            SecurityError::Validation(msg) => Self::ValidationError(msg),
            SecurityError::Database(msg) => Self::DatabaseError(msg),
            SecurityError::Internal(msg) => Self::InternalError(msg),
            SecurityError::InvalidSession
            | SecurityError::BreachDetected
            | SecurityError::RotationLimitExceeded => Self::SessionEnded,
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::NotFound(format!("{resource} {id} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn forbidden() -> Self {
        Self::Forbidden("Administrator access required".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_clear_cookie() {
        let response = ApiError::from(SecurityError::BreachDetected).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn concurrent_refresh_keeps_cookie() {
        let response = ApiError::from(SecurityError::RefreshInProgress).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[test]
    fn rate_limit_sets_retry_after() {
        let response = ApiError::from(SecurityError::RateLimited {
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (
                SecurityError::AccountLocked { remaining_ms: 10 },
                StatusCode::LOCKED,
            ),
            (SecurityError::CsrfInvalid, StatusCode::FORBIDDEN),
            (SecurityError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (SecurityError::InvalidResetToken, StatusCode::BAD_REQUEST),
            (
                SecurityError::Database("x".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
