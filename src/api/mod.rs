use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::db::Store;
use crate::services::{AuthService, SeaOrmAuthService, SecurityServices};

mod admin;
pub mod auth;
pub mod cookies;
mod error;
mod observability;
mod sessions;
mod types;

pub use cookies::CookieCodec;
pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub store: Store,

    pub services: SecurityServices,

    pub auth: Arc<dyn AuthService>,

    pub cookies: CookieCodec,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

/// Wires the HTTP state around already built services.
pub fn create_app_state(
    config: Config,
    store: Store,
    services: SecurityServices,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let cookies = CookieCodec::from_config(&config)?;

    let auth: Arc<dyn AuthService> = Arc::new(SeaOrmAuthService::new(
        store.clone(),
        services.clone(),
        config.security.clone(),
        config.notifier.public_base_url.clone(),
    ));

    Ok(Arc::new(AppState {
        config,
        store,
        services,
        auth,
        cookies,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    }))
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let store = Store::with_pool_options(
        &config.general.database_path,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;

    let clock: SharedClock = Arc::new(SystemClock);
    let notifier = SecurityServices::notifier_from_config(&config)?;
    let services = SecurityServices::build(&store, &config, clock, notifier);

    create_app_state(config, store, services, prometheus_handle)
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.config.server.cors_allowed_origins.clone();

    let api_router = Router::new()
        .merge(create_protected_router(state.clone()))
        .merge(create_session_cookie_router(state.clone()))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/csrf", get(auth::csrf_token))
        .route(
            "/auth/password-reset/request",
            post(auth::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(auth::confirm_password_reset),
        )
        .route("/metrics", get(observability::get_metrics))
        .route("/health", get(observability::health))
        .with_state(state);

    // Cookies are credentials, so origins must be listed explicitly.
    let origins: Vec<HeaderValue> = cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
    let cors_layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    // Outermost first.
    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(cors_layer);

    Router::new().nest("/api", api_router).layer(layers)
}

/// Routes that read the session cookie themselves and must work with an
/// expired access token.
fn create_session_cookie_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route_layer(middleware::from_fn_with_state(state, auth::csrf_middleware))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin_routes = Router::new()
        .route("/admin/audit-logs", get(admin::audit_logs))
        .route("/admin/failed-logins", get(admin::failed_logins))
        .route(
            "/admin/users/{id}/security-summary",
            get(admin::security_summary),
        )
        .route("/admin/suspicious-ips", get(admin::suspicious_ips))
        .route("/admin/cleanup/audit-logs", post(admin::cleanup_audit_logs))
        .route("/admin/cleanup/sessions", post(admin::cleanup_sessions))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_middleware,
        ));

    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/password", put(auth::change_password))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}", delete(sessions::revoke_session))
        .route("/sessions/revoke-others", post(sessions::revoke_other_sessions))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::csrf_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
