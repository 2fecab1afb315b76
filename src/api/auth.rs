use axum::{
    Extension, Json,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use super::cookies::{clear_session_cookie, read_cookie};
use super::{
    ApiError, ApiResponse, AppState, ChangePasswordRequest, CsrfResponse, LoginRequest,
    MessageResponse, PasswordResetConfirm, PasswordResetRequest, RefreshResponse,
    RegisterRequest, RevokedResponse, SessionResponse,
};
use crate::services::{AuthenticatedSession, ClientContext, SessionData, UserInfo};

// ============================================================================
// Request context
// ============================================================================

/// Client IP from the usual proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Proxy headers first, then the socket peer address.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    extract_client_ip(headers).or_else(|| peer.map(|addr| addr.ip().to_string()))
}

impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self {
            ip: resolve_client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get("user-agent")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        })
    }
}

fn respond_with_cookies<T: Serialize>(
    status: StatusCode,
    cookies: impl IntoIterator<Item = HeaderValue>,
    data: T,
) -> Response {
    let mut response = (status, Json(ApiResponse::success(data))).into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

fn issue_session(
    state: &AppState,
    status: StatusCode,
    authenticated: AuthenticatedSession,
) -> Result<Response, ApiError> {
    let csrf_token = state.services.csrf.generate_token();
    let cookies = [
        state.cookies.session_cookie(&authenticated.session)?,
        state.cookies.csrf_cookie(&csrf_token)?,
    ];

    Ok(respond_with_cookies(
        status,
        cookies,
        SessionResponse {
            user: authenticated.user,
            session_id: authenticated.session.session_id,
            access_expires_at: authenticated.session.access_expires_at,
            csrf_token,
        },
    ))
}

// ============================================================================
// Middleware
// ============================================================================

/// Admits requests carrying a live session cookie and stores the decoded
/// [`SessionData`] as a request extension.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(session) = state.cookies.session_from_headers(request.headers()) else {
        return Err(ApiError::Unauthorized("Not signed in".to_string()));
    };

    let live = state
        .services
        .sessions
        .validate_session(&session.session_id, session.user_id, &session.refresh_token)
        .await?;
    if !live {
        return Err(ApiError::SessionEnded);
    }

    // The client is expected to call /auth/refresh and retry.
    if session.access_expires_at <= state.services.clock.now() {
        return Err(ApiError::Unauthorized("Access token expired".to_string()));
    }

    tracing::Span::current().record("user_id", session.user_id);
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Double-submit check for state-changing methods.
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        let headers = request.headers();
        let header = headers
            .get(state.config.csrf.header_name.as_str())
            .and_then(|v| v.to_str().ok());
        let cookie = read_cookie(headers, state.cookies.csrf_cookie_name());

        state
            .services
            .csrf
            .verify(header, cookie.as_deref(), ctx.ip(), ctx.user_agent())?;
    }

    Ok(next.run(request).await)
}

/// The admin flag is read from the database, not from the cookie.
pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let is_admin = state
        .store
        .get_user(session.user_id)
        .await?
        .is_some_and(|user| user.is_admin);

    if !is_admin {
        warn!(user_id = session.user_id, path = %request.uri().path(), "Admin access denied");
        return Err(ApiError::forbidden());
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    let authenticated = state
        .auth
        .register(&payload.email, &payload.password, &ctx)
        .await?;

    issue_session(&state, StatusCode::CREATED, authenticated)
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Email and password are required"));
    }

    let authenticated = state
        .auth
        .login(&payload.email, &payload.password, payload.remember_me, &ctx)
        .await?;

    issue_session(&state, StatusCode::OK, authenticated)
}

/// POST /auth/refresh
/// Rotates the refresh token held in the session cookie.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some(session) = state.cookies.session_from_headers(&headers) else {
        return Err(ApiError::SessionEnded);
    };

    let rotated = state.auth.refresh(&session, &ctx).await.map_err(|e| {
        if e.requires_reauthentication() {
            info!(user_id = session.user_id, reason = ?e, "Refresh rejected");
        }
        ApiError::from(e)
    })?;

    let csrf_token = state.services.csrf.generate_token();
    let cookies = [
        state.cookies.session_cookie(&rotated)?,
        state.cookies.csrf_cookie(&csrf_token)?,
    ];

    Ok(respond_with_cookies(
        StatusCode::OK,
        cookies,
        RefreshResponse {
            session_id: rotated.session_id,
            access_expires_at: rotated.access_expires_at,
            csrf_token,
        },
    ))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(session) = state.cookies.session_from_headers(&headers)
        && let Err(e) = state.auth.logout(&session, &ctx).await
    {
        warn!(error = %e, "Logout failed to revoke session");
    }

    // Always clear the cookies, even if the session record was missing.
    let cookies = [clear_session_cookie(), state.cookies.clear_csrf_cookie()?];
    Ok(respond_with_cookies(
        StatusCode::OK,
        cookies,
        MessageResponse::new("Logged out"),
    ))
}

/// GET /auth/csrf
pub async fn csrf_token(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let csrf_token = state.services.csrf.generate_token();
    let cookie = state.cookies.csrf_cookie(&csrf_token)?;
    Ok(respond_with_cookies(
        StatusCode::OK,
        [cookie],
        CsrfResponse { csrf_token },
    ))
}

/// GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let user = state.auth.get_user(session.user_id).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// POST /auth/password-reset/request
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state
        .auth
        .request_password_reset(&payload.email, &ctx)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "If the account exists, a reset link has been sent",
    ))))
}

/// POST /auth/password-reset/confirm
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    ctx: ClientContext,
    Json(payload): Json<PasswordResetConfirm>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state
        .auth
        .complete_password_reset(&payload.token, &payload.new_password, &ctx)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password updated, please sign in again",
    ))))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionData>,
    ctx: ClientContext,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<RevokedResponse>>, ApiError> {
    let revoked = state
        .auth
        .change_password(
            &session,
            &payload.current_password,
            &payload.new_password,
            &ctx,
        )
        .await?;

    Ok(Json(ApiResponse::success(RevokedResponse { revoked })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"),
        );
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn client_ip_falls_back_to_peer_address() {
        let peer: SocketAddr = "198.51.100.7:53211".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)).as_deref(),
            Some("198.51.100.7")
        );
        assert!(resolve_client_ip(&headers, None).is_none());

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)).as_deref(),
            Some("10.0.0.2")
        );
    }

    #[tokio::test]
    async fn context_reads_connect_info() {
        let peer: SocketAddr = "198.51.100.8:40000".parse().unwrap();
        let request = axum::http::Request::builder()
            .uri("/")
            .header("user-agent", "curl/8.0")
            .extension(ConnectInfo(peer))
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();

        let ctx = ClientContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.ip.as_deref(), Some("198.51.100.8"));
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn client_ip_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert!(extract_client_ip(&headers).is_none());
    }
}
