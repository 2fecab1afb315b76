//! Outbound user notifications.
//!
//! [`WebhookNotifier`] posts JSON payloads with a per-attempt timeout and
//! exponential backoff. Failures are classified so callers can tell a slow
//! endpoint from an unreachable one or a rejecting one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::NotifierConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    AccountLocked {
        user_id: i32,
        email: String,
        locked_until: DateTime<Utc>,
    },
    SuspiciousActivity {
        user_id: i32,
        email: String,
        detail: String,
        ip_address: Option<String>,
    },
    PasswordReset {
        user_id: i32,
        email: String,
        reset_url: String,
        expires_at: DateTime<Utc>,
    },
    PasswordChanged {
        user_id: i32,
        email: String,
    },
}

impl Notification {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AccountLocked { .. } => "account_locked",
            Self::SuspiciousActivity { .. } => "suspicious_activity",
            Self::PasswordReset { .. } => "password_reset",
            Self::PasswordChanged { .. } => "password_changed",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification endpoint timed out")]
    Timeout,

    #[error("Notification endpoint unreachable: {0}")]
    Network(String),

    #[error("Notification endpoint returned HTTP {status}")]
    Api { status: u16 },
}

impl NotifyError {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Api { status } => *status >= 500 || *status == 429,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Delivers `notification` on a background task. Failures are only logged.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(kind = notification.kind(), error = %e, "Notification failed");
        }
    });
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = notification.kind(),
            "Notification (no webhook configured)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    max_attempts: u32,
    backoff_base: Duration,
}

impl WebhookNotifier {
    pub fn new(
        url: Url,
        timeout: Duration,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Warden/1.0")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            url,
            max_attempts: max_attempts.max(1),
            backoff_base,
        })
    }

    pub fn from_config(config: &NotifierConfig) -> anyhow::Result<Option<Self>> {
        let Some(raw) = config.webhook_url.as_deref() else {
            return Ok(None);
        };

        let url = Url::parse(raw)?;
        Self::new(
            url,
            Duration::from_secs(config.timeout_seconds),
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
        )
        .map(Some)
    }

    async fn try_send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Api {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

fn classify(err: reqwest::Error) -> NotifyError {
    if err.is_timeout() {
        NotifyError::Timeout
    } else {
        NotifyError::Network(err.to_string())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut attempt = 1;

        loop {
            match self.try_send(notification).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        attempt,
                        kind = notification.kind(),
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        kind = notification.kind(),
                        error = %e,
                        "Notification delivery failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/hook")).unwrap()
    }

    fn sample() -> Notification {
        Notification::PasswordChanged {
            user_id: 1,
            email: "user@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_on_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let url = serve(Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NO_CONTENT
                }
            }),
        ))
        .await;

        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(2), 3, Duration::from_millis(1)).unwrap();
        notifier.notify(&sample()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_then_reports_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let url = serve(Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }
            }),
        ))
        .await;

        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(2), 3, Duration::from_millis(1)).unwrap();
        let err = notifier.notify(&sample()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Api { status: 502 }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let url = serve(Router::new().route(
            "/hook",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_REQUEST
                }
            }),
        ))
        .await;

        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(2), 3, Duration::from_millis(1)).unwrap();
        let err = notifier.notify(&sample()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Api { status: 400 }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let url = serve(Router::new().route(
            "/hook",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                StatusCode::OK
            }),
        ))
        .await;

        let notifier =
            WebhookNotifier::new(url, Duration::from_millis(100), 1, Duration::from_millis(1))
                .unwrap();
        let err = notifier.notify(&sample()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Timeout));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/hook")).unwrap();
        let notifier =
            WebhookNotifier::new(url, Duration::from_secs(1), 2, Duration::from_millis(1)).unwrap();
        let err = notifier.notify(&sample()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Network(_)));
    }

    #[test]
    fn payload_is_tagged() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["type"], "password_changed");
        assert_eq!(value["email"], "user@example.com");
    }
}
