//! Per-account lockout after repeated failed logins.
//!
//! Every state change is a single conditional `UPDATE`, so concurrent
//! failures for the same account never lose an increment.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::LockoutConfig;
use crate::db::Store;
use crate::error::SecurityResult;
use crate::services::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::services::notifier::{self, Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
    pub is_locked: bool,
    pub remaining_ms: Option<i64>,
}

impl LockoutStatus {
    const UNLOCKED: Self = Self {
        is_locked: false,
        remaining_ms: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailedLoginOutcome {
    pub is_locked: bool,
    pub failed_attempts: i32,
    pub remaining_ms: Option<i64>,
}

#[derive(Clone)]
pub struct LockoutGuard {
    store: Store,
    config: LockoutConfig,
    clock: SharedClock,
    audit: AuditLogger,
    notifier: Arc<dyn Notifier>,
}

impl LockoutGuard {
    #[must_use]
    pub fn new(
        store: Store,
        config: LockoutConfig,
        clock: SharedClock,
        audit: AuditLogger,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            audit,
            notifier,
        }
    }

    /// Reports whether the account is locked. An expired lock is cleared on
    /// the way, together with the failure counter.
    pub async fn check_lockout(&self, user_id: i32) -> SecurityResult<LockoutStatus> {
        let now = self.clock.now();

        let Some(state) = self.store.get_lockout_state(user_id).await? else {
            return Ok(LockoutStatus::UNLOCKED);
        };

        match state.locked_until {
            Some(until) if until > now => Ok(LockoutStatus {
                is_locked: true,
                remaining_ms: Some((until - now).num_milliseconds().max(1)),
            }),
            Some(_) => {
                if self.store.clear_expired_lock(user_id, now).await? {
                    info!(user_id, "Account lock expired");
                }
                Ok(LockoutStatus::UNLOCKED)
            }
            None => Ok(LockoutStatus::UNLOCKED),
        }
    }

    pub async fn record_failed_login(
        &self,
        user_id: i32,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> SecurityResult<FailedLoginOutcome> {
        let now = self.clock.now();
        let until = now + self.config.lockout_duration();

        self.store.increment_failed_attempts(user_id, now).await?;

        let locked_now = self
            .store
            .lock_user_if_threshold_reached(user_id, self.config.max_failed_attempts, until, now)
            .await?;

        let state = self.store.get_lockout_state(user_id).await?;
        let failed_attempts = state.map_or(0, |s| s.failed_attempts);
        let locked_until = state.and_then(|s| s.locked_until).filter(|u| *u > now);

        if locked_now {
            metrics::counter!("warden_account_lockouts_total").increment(1);
            warn!(user_id, failed_attempts, "Account locked");

            self.audit.log(
                AuditEntry::new(AuditEventType::AccountLocked)
                    .user(user_id)
                    .client(ip, user_agent)
                    .data(json!({
                        "failed_attempts": failed_attempts,
                        "locked_until": until,
                    }))
                    .failed(),
            );

            self.notify_locked(user_id, until).await;
        }

        Ok(FailedLoginOutcome {
            is_locked: locked_until.is_some(),
            failed_attempts,
            remaining_ms: locked_until.map(|u| (u - now).num_milliseconds().max(1)),
        })
    }

    pub async fn reset_failed_attempts(&self, user_id: i32) -> SecurityResult<()> {
        self.store
            .reset_failed_attempts(user_id, self.clock.now())
            .await?;
        Ok(())
    }

    async fn notify_locked(&self, user_id: i32, locked_until: chrono::DateTime<chrono::Utc>) {
        let email = match self.store.get_user(user_id).await {
            Ok(Some(user)) => user.email,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id, error = %e, "Could not load user for lockout notification");
                return;
            }
        };

        let notification = Notification::AccountLocked {
            user_id,
            email,
            locked_until,
        };
        notifier::dispatch(&self.notifier, notification);
    }
}
