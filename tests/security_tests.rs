mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::{CLIENT_IP, Jar, register, request, send, send_with_jar, spawn_app, test_config};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden::clock::SystemClock;
use warden::db::Store;
use warden::services::{Notification, Notifier, NotifyError, SecurityServices};

#[derive(Default)]
struct Outbox(Mutex<Vec<Notification>>);

#[async_trait]
impl Notifier for Outbox {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

impl Outbox {
    /// Notifications are delivered in the background, so poll briefly.
    async fn wait_for(&self, kind: &str) -> Option<Notification> {
        for _ in 0..200 {
            let found = self.0.lock().unwrap().iter().rev().find(|n| n.kind() == kind).cloned();
            if found.is_some() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    async fn reset_token(&self) -> Option<String> {
        match self.wait_for("password_reset").await? {
            Notification::PasswordReset { reset_url, .. } => reset_url
                .split_once("#token=")
                .map(|(_, token)| token.to_string()),
            _ => None,
        }
    }
}

fn login_body(email: &str, password: &str) -> serde_json::Value {
    json!({ "email": email, "password": password })
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let (app, state) = spawn_app().await;
    register(&app, "grace@example.com", "correct horse").await;

    for _ in 0..5 {
        let reply = send(
            &app,
            request(
                "POST",
                "/api/auth/login",
                &Jar::default(),
                CLIENT_IP,
                Some(login_body("grace@example.com", "wrong password")),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["error"], "Invalid email or password");
    }

    // Correct password, but the account is locked now.
    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            &Jar::default(),
            CLIENT_IP,
            Some(login_body("grace@example.com", "correct horse")),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::LOCKED);

    let user = state
        .store
        .get_user_by_email("grace@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.failed_attempts, 5);
    assert!(user.locked_until.is_some());

    // Unknown accounts fail exactly like wrong passwords.
    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            &Jar::default(),
            CLIENT_IP,
            Some(login_body("nobody@example.com", "whatever-pass")),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "Invalid email or password");
}

#[tokio::test]
async fn test_registration_is_rate_limited_per_ip() {
    let (app, _) = spawn_app().await;

    for i in 0..5 {
        let reply = send(
            &app,
            request(
                "POST",
                "/api/auth/register",
                &Jar::default(),
                "203.0.113.50",
                Some(login_body(&format!("user{i}@example.com"), "correct horse")),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CREATED);
    }

    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/register",
            &Jar::default(),
            "203.0.113.50",
            Some(login_body("user5@example.com", "correct horse")),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = reply
        .headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=3600).contains(&retry_after));

    // Other clients are unaffected.
    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/register",
            &Jar::default(),
            "203.0.113.51",
            Some(login_body("user5@example.com", "correct horse")),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let config = test_config();
    let store = Store::new(&config.general.database_path).await.unwrap();
    let outbox = Arc::new(Outbox::default());
    let services =
        SecurityServices::build(&store, &config, Arc::new(SystemClock), outbox.clone());
    let state = warden::api::create_app_state(config, store, services, None).unwrap();
    let app = warden::api::router(state);

    let (old_session, _) = register(&app, "heidi@example.com", "correct horse").await;

    for email in ["heidi@example.com", "stranger@example.com"] {
        let reply = send(
            &app,
            request(
                "POST",
                "/api/auth/password-reset/request",
                &Jar::default(),
                CLIENT_IP,
                Some(json!({ "email": email })),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let token = outbox.reset_token().await.expect("reset token was not delivered");

    let confirm = json!({ "token": token, "new_password": "battery staple" });
    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/password-reset/confirm",
            &Jar::default(),
            CLIENT_IP,
            Some(confirm.clone()),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    // Every session of the user ended with the reset.
    let reply = send(&app, request("GET", "/api/auth/me", &old_session, CLIENT_IP, None)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    // Tokens are single use.
    let reply = send(
        &app,
        request(
            "POST",
            "/api/auth/password-reset/confirm",
            &Jar::default(),
            CLIENT_IP,
            Some(confirm),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let mut jar = Jar::default();
    let reply = send_with_jar(
        &app,
        &mut jar,
        "POST",
        "/api/auth/login",
        Some(login_body("heidi@example.com", "battery staple")),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    assert!(outbox.wait_for("password_changed").await.is_some());
}

#[tokio::test]
async fn test_change_password_keeps_current_session() {
    let (app, _) = spawn_app().await;
    let (mut current, _) = register(&app, "ivan@example.com", "correct horse").await;

    let mut other = Jar::default();
    send_with_jar(
        &app,
        &mut other,
        "POST",
        "/api/auth/login",
        Some(login_body("ivan@example.com", "correct horse")),
    )
    .await;

    let reply = send_with_jar(
        &app,
        &mut current,
        "PUT",
        "/api/auth/password",
        Some(json!({ "current_password": "wrong", "new_password": "battery staple" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send_with_jar(
        &app,
        &mut current,
        "PUT",
        "/api/auth/password",
        Some(json!({ "current_password": "correct horse", "new_password": "battery staple" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["revoked"], 1);

    let me = send_with_jar(&app, &mut current, "GET", "/api/auth/me", None).await;
    assert_eq!(me.status, StatusCode::OK);

    let reply = send(&app, request("GET", "/api/auth/me", &other, CLIENT_IP, None)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}
