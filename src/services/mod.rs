pub mod audit;
pub use audit::{AuditEntry, AuditEventType, AuditLogger, AuditSink};

pub mod csrf;
pub use csrf::CsrfGuard;

pub mod device;

pub mod lockout;
pub use lockout::LockoutGuard;

pub mod maintenance;
pub use maintenance::{CleanupReport, MaintenanceService};

pub mod notifier;
pub use notifier::{LogNotifier, Notification, Notifier, NotifyError, WebhookNotifier};

pub mod password;
pub use password::{Argon2Hasher, CredentialHasher};

pub mod password_reset;
pub use password_reset::PasswordResetService;

pub mod rate_limit;
pub use rate_limit::{LimiterKind, RateLimitKey, RateLimiter};

pub mod session;
pub use session::{ActiveSession, NewSession, SessionData, SessionService};

pub mod tokens;

pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthService, AuthenticatedSession, ClientContext, ExternalIdentity, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::db::Store;

/// Every security component, wired once at startup and shared by handle.
#[derive(Clone)]
pub struct SecurityServices {
    pub clock: SharedClock,
    pub audit: AuditLogger,
    pub rate_limiter: RateLimiter,
    pub lockout: LockoutGuard,
    pub csrf: CsrfGuard,
    pub sessions: SessionService,
    pub password_resets: PasswordResetService,
    pub maintenance: MaintenanceService,
    pub notifier: Arc<dyn Notifier>,
    pub hasher: Arc<dyn CredentialHasher>,
}

impl SecurityServices {
    /// Must be called inside a tokio runtime; the audit writer is spawned here.
    pub fn build(
        store: &Store,
        config: &Config,
        clock: SharedClock,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let audit = AuditLogger::new(
            Arc::new(store.clone()),
            store.clone(),
            clock.clone(),
            config.audit.queue_capacity,
        );

        Self {
            rate_limiter: RateLimiter::new(config.rate_limit.clone(), clock.clone(), audit.clone()),
            lockout: LockoutGuard::new(
                store.clone(),
                config.lockout.clone(),
                clock.clone(),
                audit.clone(),
                notifier.clone(),
            ),
            csrf: CsrfGuard::new(audit.clone()),
            sessions: SessionService::new(
                store.clone(),
                config.session.clone(),
                clock.clone(),
                audit.clone(),
                notifier.clone(),
            ),
            password_resets: PasswordResetService::new(
                store.clone(),
                clock.clone(),
                config.notifier.reset_token_minutes,
            ),
            maintenance: MaintenanceService::new(
                store.clone(),
                clock.clone(),
                audit.clone(),
                config.maintenance.clone(),
                config.audit.retention_days,
            ),
            hasher: Arc::new(Argon2Hasher::new(&config.security)),
            notifier,
            audit,
            clock,
        }
    }

    /// Picks the webhook notifier when one is configured.
    pub fn notifier_from_config(config: &Config) -> anyhow::Result<Arc<dyn Notifier>> {
        Ok(match WebhookNotifier::from_config(&config.notifier)? {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(LogNotifier),
        })
    }
}
