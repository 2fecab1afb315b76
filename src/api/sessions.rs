use axum::{
    Extension, Json,
    extract::{Path, State},
};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, MessageResponse, RevokedResponse};
use crate::services::{ActiveSession, SessionData};

/// GET /sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
) -> Result<Json<ApiResponse<Vec<ActiveSession>>>, ApiError> {
    let sessions = state
        .services
        .sessions
        .list_active_sessions(session.user_id, Some(&session.session_id))
        .await?;

    Ok(Json(ApiResponse::success(sessions)))
}

/// DELETE /sessions/{id}
/// Only sessions owned by the caller can be revoked.
pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let revoked = state
        .services
        .sessions
        .revoke_session(&id, session.user_id)
        .await?;

    if !revoked {
        return Err(ApiError::not_found("Session", id));
    }

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Session revoked",
    ))))
}

/// POST /sessions/revoke-others
pub async fn revoke_other_sessions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
) -> Result<Json<ApiResponse<RevokedResponse>>, ApiError> {
    let revoked = state
        .services
        .sessions
        .revoke_other_sessions(session.user_id, &session.session_id)
        .await?;

    Ok(Json(ApiResponse::success(RevokedResponse { revoked })))
}
