use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::UserInfo;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Returned whenever a session cookie is issued.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserInfo,
    pub session_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub session_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokedResponse {
    pub revoked: u64,
}

// ============================================================================
// Admin
// ============================================================================

fn default_hours() -> i64 {
    24
}

fn default_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct FailedLoginsQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
    #[serde(default = "FailedLoginsQuery::default_limit")]
    pub limit: u64,
}

impl FailedLoginsQuery {
    const fn default_limit() -> u64 {
        100
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct SuspiciousIpsQuery {
    #[serde(default = "SuspiciousIpsQuery::default_threshold")]
    pub threshold: i64,
    #[serde(default = "default_hours")]
    pub hours: i64,
}

impl SuspiciousIpsQuery {
    const fn default_threshold() -> i64 {
        10
    }
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub older_than_days: i64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub database: bool,
}
