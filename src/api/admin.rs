//! Security reporting and housekeeping for administrators.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

use super::{
    ApiError, ApiResponse, AppState, CleanupRequest, DeletedResponse, FailedLoginsQuery,
    SummaryQuery, SuspiciousIpsQuery,
};
use crate::services::CleanupReport;
use crate::services::audit::{
    AuditPage, AuditQuery, FailedLoginReport, SuspiciousIp, UserSecuritySummary,
};

fn positive(value: i64, name: &str) -> Result<i64, ApiError> {
    if value < 1 {
        return Err(ApiError::validation(format!("{name} must be at least 1")));
    }
    Ok(value)
}

/// GET /admin/audit-logs
pub async fn audit_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiResponse<AuditPage>>, ApiError> {
    let page = state.services.audit.query(&query).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /admin/failed-logins
pub async fn failed_logins(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FailedLoginsQuery>,
) -> Result<Json<ApiResponse<FailedLoginReport>>, ApiError> {
    let hours = positive(query.hours, "hours")?;
    let since = state.services.clock.now() - Duration::hours(hours);

    let report = state
        .services
        .audit
        .failed_logins(since, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /admin/users/{id}/security-summary
pub async fn security_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ApiResponse<UserSecuritySummary>>, ApiError> {
    if state.store.get_user(user_id).await?.is_none() {
        return Err(ApiError::not_found("User", user_id));
    }

    let days = positive(query.days, "days")?;
    let since = state.services.clock.now() - Duration::days(days);

    let summary = state.services.audit.user_summary(user_id, since).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /admin/suspicious-ips
pub async fn suspicious_ips(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuspiciousIpsQuery>,
) -> Result<Json<ApiResponse<Vec<SuspiciousIp>>>, ApiError> {
    let hours = positive(query.hours, "hours")?;
    let since = state.services.clock.now() - Duration::hours(hours);

    let ips = state
        .services
        .audit
        .suspicious_ips(query.threshold, since)
        .await?;
    Ok(Json(ApiResponse::success(ips)))
}

/// POST /admin/cleanup/audit-logs
pub async fn cleanup_audit_logs(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CleanupRequest>,
) -> Result<Json<ApiResponse<DeletedResponse>>, ApiError> {
    let deleted = state
        .services
        .audit
        .cleanup(payload.older_than_days)
        .await?;

    info!(
        deleted,
        older_than_days = payload.older_than_days,
        "Audit log cleanup requested by admin"
    );
    Ok(Json(ApiResponse::success(DeletedResponse { deleted })))
}

/// POST /admin/cleanup/sessions
pub async fn cleanup_sessions(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CleanupRequest>,
) -> Result<Json<ApiResponse<CleanupReport>>, ApiError> {
    let report = state
        .services
        .maintenance
        .run_cleanup(payload.older_than_days)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}
