#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{
        HeaderMap, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
};
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use warden::api::AppState;
use warden::clock::ManualClock;
use warden::config::Config;
use warden::db::Store;
use warden::services::{LogNotifier, SecurityServices};

pub const CLIENT_IP: &str = "198.51.100.7";

pub fn test_config() -> Config {
    let mut config = Config::default();
    let path = std::env::temp_dir().join(format!("warden-it-{}.db", uuid::Uuid::new_v4()));
    config.general.database_path = format!("sqlite:{}", path.display());
    config.general.max_db_connections = 2;
    config.server.secure_cookies = false;
    config.server.cookie_key = base64::engine::general_purpose::STANDARD.encode([42u8; 32]);
    config.observability.metrics_enabled = false;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config
}

pub async fn spawn_app_with(config: Config) -> (Router, Arc<AppState>) {
    let state = warden::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");
    (warden::api::router(state.clone()), state)
}

pub async fn spawn_app() -> (Router, Arc<AppState>) {
    spawn_app_with(test_config()).await
}

/// App whose security services read time from a [`ManualClock`].
pub async fn spawn_app_with_clock(config: Config) -> (Router, Arc<AppState>, Arc<ManualClock>) {
    let store = Store::new(&config.general.database_path)
        .await
        .expect("Failed to open store");
    let clock = Arc::new(ManualClock::starting_now());
    let services = SecurityServices::build(&store, &config, clock.clone(), Arc::new(LogNotifier));
    let state = warden::api::create_app_state(config, store, services, None)
        .expect("Failed to create app state");
    (warden::api::router(state.clone()), state, clock)
}

/// Minimal cookie jar for the session and CSRF cookies.
#[derive(Debug, Clone, Default)]
pub struct Jar {
    pub session: Option<String>,
    pub csrf: Option<String>,
}

impl Jar {
    pub fn absorb(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let raw = value.to_str().unwrap();
            let pair = raw.split(';').next().unwrap();
            if let Some(v) = pair.strip_prefix("warden_session=") {
                self.session = (!v.is_empty()).then(|| v.to_string());
            } else if let Some(v) = pair.strip_prefix("csrf_token=") {
                self.csrf = (!v.is_empty()).then(|| v.to_string());
            }
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(session) = &self.session {
            parts.push(format!("warden_session={session}"));
        }
        if let Some(csrf) = &self.csrf {
            parts.push(format!("csrf_token={csrf}"));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

pub fn request(method: &str, uri: &str, jar: &Jar, ip: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0");

    if let Some(cookie) = jar.cookie_header() {
        builder = builder.header(COOKIE, cookie);
    }
    if let Some(csrf) = &jar.csrf {
        builder = builder.header("x-csrf-token", csrf);
    }

    match body {
        Some(json) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Reply {
        status,
        headers,
        body,
    }
}

/// Sends a request and keeps whatever cookies the server sets.
pub async fn send_with_jar(
    app: &Router,
    jar: &mut Jar,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Reply {
    let reply = send(app, request(method, uri, jar, CLIENT_IP, body)).await;
    jar.absorb(&reply.headers);
    reply
}

pub async fn register(app: &Router, email: &str, password: &str) -> (Jar, Reply) {
    let mut jar = Jar::default();
    let reply = send_with_jar(
        app,
        &mut jar,
        "POST",
        "/api/auth/register",
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "register failed: {}", reply.body);
    (jar, reply)
}
