//! Error kinds shared by the security services.
//!
//! Session failures are deliberately coarse: callers learn that they have
//! to sign in again, never which check failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Session is no longer valid")]
    InvalidSession,

    /// The whole token family has already been revoked.
    #[error("Session is no longer valid")]
    BreachDetected,

    /// The session was force-revoked after too many rotations.
    #[error("Session is no longer valid")]
    RotationLimitExceeded,

    /// The refresh token was rotated moments ago by a parallel request.
    /// The client should keep the cookie that request set.
    #[error("Session refresh already in progress")]
    RefreshInProgress,

    #[error("Too many attempts, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Account is temporarily locked")]
    AccountLocked { remaining_ms: i64 },

    #[error("Invalid CSRF token")]
    CsrfInvalid,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Reset link is invalid or has expired")]
    InvalidResetToken,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SecurityError {
    /// True for every variant that means "authenticate again".
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::InvalidSession | Self::BreachDetected | Self::RotationLimitExceeded
        )
    }
}

impl From<sea_orm::DbErr> for SecurityError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for SecurityError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

pub type SecurityResult<T> = Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_share_a_generic_message() {
        let messages: Vec<String> = [
            SecurityError::InvalidSession,
            SecurityError::BreachDetected,
            SecurityError::RotationLimitExceeded,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        assert!(messages.iter().all(|m| m == "Session is no longer valid"));
    }

    #[test]
    fn reauthentication_classification() {
        assert!(SecurityError::BreachDetected.requires_reauthentication());
        assert!(!SecurityError::CsrfInvalid.requires_reauthentication());
        assert!(!SecurityError::RefreshInProgress.requires_reauthentication());
        assert!(
            !SecurityError::RateLimited {
                retry_after_secs: 3
            }
            .requires_reauthentication()
        );
    }

    #[test]
    fn db_errors_convert() {
        let err: SecurityError = sea_orm::DbErr::Custom("boom".to_string()).into();
        assert!(matches!(err, SecurityError::Database(_)));
    }
}
