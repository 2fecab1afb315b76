//! Process-local fixed-window rate limiting.
//!
//! Counters live in memory only and start from zero after a restart.
//! Limits are not shared between processes.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::{LimitRule, RateLimitConfig};
use crate::error::{SecurityError, SecurityResult};
use crate::services::audit::{AuditEntry, AuditEventType, AuditLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKind {
    LoginByIp,
    LoginByEmail,
    RegisterByIp,
    PasswordResetByIp,
    EmailVerificationByIp,
}

impl LimiterKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginByIp => "login_by_ip",
            Self::LoginByEmail => "login_by_email",
            Self::RegisterByIp => "register_by_ip",
            Self::PasswordResetByIp => "password_reset_by_ip",
            Self::EmailVerificationByIp => "email_verification_by_ip",
        }
    }

    #[must_use]
    pub const fn is_ip_based(self) -> bool {
        !matches!(self, Self::LoginByEmail)
    }

    #[must_use]
    pub const fn rule(self, config: &RateLimitConfig) -> LimitRule {
        match self {
            Self::LoginByIp => config.login_by_ip,
            Self::LoginByEmail => config.login_by_email,
            Self::RegisterByIp => config.register_by_ip,
            Self::PasswordResetByIp => config.password_reset_by_ip,
            Self::EmailVerificationByIp => config.email_verification_by_ip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub kind: LimiterKind,
    pub subject: String,
}

impl RateLimitKey {
    #[must_use]
    pub fn new(kind: LimiterKind, subject: &str) -> Self {
        Self {
            kind,
            subject: subject.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<RateLimitKey, Window>>,
    config: RateLimitConfig,
    clock: SharedClock,
    audit: AuditLogger,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig, clock: SharedClock, audit: AuditLogger) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            config,
            clock,
            audit,
        }
    }

    /// Counts one attempt against `key`.
    ///
    /// Returns the attempts left in the current window, or `RateLimited`
    /// with the seconds until the window resets.
    pub fn check_with(&self, key: &RateLimitKey, rule: LimitRule) -> SecurityResult<u32> {
        let now = self.clock.now();
        let window = Duration::seconds(i64::try_from(rule.window_seconds).unwrap_or(i64::MAX / 1000));

        let outcome = {
            let mut entry = self.windows.entry(key.clone()).or_insert(Window {
                count: 0,
                reset_at: now + window,
            });

            if entry.reset_at <= now {
                entry.count = 0;
                entry.reset_at = now + window;
            }

            entry.count = entry.count.saturating_add(1);

            if entry.count > rule.max_attempts {
                Err(retry_after_secs(entry.reset_at - now, rule.window_seconds))
            } else {
                Ok(rule.max_attempts - entry.count)
            }
        };

        outcome.map_err(|retry_after_secs| {
            metrics::counter!("warden_rate_limited_total", "kind" => key.kind.as_str())
                .increment(1);
            warn!(
                limiter = key.kind.as_str(),
                retry_after_secs, "Rate limit exceeded"
            );

            let ip = key.kind.is_ip_based().then_some(key.subject.as_str());
            self.audit.log(
                AuditEntry::new(AuditEventType::RateLimitExceeded)
                    .client(ip, None)
                    .data(json!({
                        "limiter": key.kind.as_str(),
                        "max_attempts": rule.max_attempts,
                        "window_seconds": rule.window_seconds,
                    }))
                    .failed(),
            );

            SecurityError::RateLimited { retry_after_secs }
        })
    }

    /// Counts one attempt using the configured rule for the key's kind.
    pub fn check(&self, key: &RateLimitKey) -> SecurityResult<u32> {
        self.check_with(key, key.kind.rule(&self.config))
    }

    /// Both the IP and the email must be within their limits.
    pub fn check_login(&self, ip: Option<&str>, email: &str) -> SecurityResult<()> {
        let ip_result = self.check(&RateLimitKey::new(LimiterKind::LoginByIp, ip.unwrap_or("unknown")));
        let email_result = self.check(&RateLimitKey::new(LimiterKind::LoginByEmail, email));
        ip_result?;
        email_result?;
        Ok(())
    }

    pub fn check_register(&self, ip: Option<&str>) -> SecurityResult<()> {
        self.check(&RateLimitKey::new(LimiterKind::RegisterByIp, ip.unwrap_or("unknown")))
            .map(|_| ())
    }

    pub fn check_password_reset(&self, ip: Option<&str>) -> SecurityResult<()> {
        self.check(&RateLimitKey::new(
            LimiterKind::PasswordResetByIp,
            ip.unwrap_or("unknown"),
        ))
        .map(|_| ())
    }

    pub fn check_email_verification(&self, ip: Option<&str>) -> SecurityResult<()> {
        self.check(&RateLimitKey::new(
            LimiterKind::EmailVerificationByIp,
            ip.unwrap_or("unknown"),
        ))
        .map(|_| ())
    }

    pub fn reset(&self, key: &RateLimitKey) {
        self.windows.remove(key);
    }

    /// Drops windows that have already reset. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Swept expired rate limit windows");
        }
        removed
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Runs `sweep` on a fixed interval until the runtime shuts down.
    #[must_use]
    pub fn spawn_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

fn retry_after_secs(remaining: Duration, window_seconds: u64) -> u64 {
    let ms = u64::try_from(remaining.num_milliseconds()).unwrap_or(0);
    ms.div_ceil(1000).clamp(1, window_seconds.max(1))
}
