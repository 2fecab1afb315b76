//! Retention-bound cleanup of sessions, reset tokens and audit rows.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::SharedClock;
use crate::config::MaintenanceConfig;
use crate::db::Store;
use crate::error::{SecurityError, SecurityResult};
use crate::services::audit::AuditLogger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub sessions_deleted: u64,
    pub parent_links_cleared: u64,
    pub reset_tokens_deleted: u64,
}

#[derive(Clone)]
pub struct MaintenanceService {
    store: Store,
    clock: SharedClock,
    audit: AuditLogger,
    config: MaintenanceConfig,
    audit_retention_days: i64,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MaintenanceService {
    #[must_use]
    pub fn new(
        store: Store,
        clock: SharedClock,
        audit: AuditLogger,
        config: MaintenanceConfig,
        audit_retention_days: i64,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            config,
            audit_retention_days,
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn run_cleanup(&self, retention_days: i64) -> SecurityResult<CleanupReport> {
        if retention_days < 1 {
            return Err(SecurityError::Validation(
                "Retention must be at least one day".to_string(),
            ));
        }

        let now = self.clock.now();
        let cutoff = now - Duration::days(retention_days);

        let sessions_deleted = self.store.delete_stale_sessions(cutoff).await?;
        let parent_links_cleared = self.store.clear_orphaned_session_parents().await?;
        let reset_tokens_deleted = self.store.prune_reset_tokens(now).await?;

        self.mark_ran(now);

        let report = CleanupReport {
            sessions_deleted,
            parent_links_cleared,
            reset_tokens_deleted,
        };
        info!(
            sessions_deleted,
            parent_links_cleared, reset_tokens_deleted, retention_days, "Session cleanup finished"
        );
        Ok(report)
    }

    fn mark_ran(&self, at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Claims the run slot if the interval has elapsed.
    fn claim(&self) -> bool {
        let now = self.clock.now();
        let interval = Duration::minutes(i64::try_from(self.config.interval_minutes).unwrap_or(60));

        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now - at < interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Runs cleanup only when enabled and the interval since the last run
    /// has passed. Returns `None` when skipped.
    pub async fn maybe_run(&self) -> SecurityResult<Option<CleanupReport>> {
        if !self.config.enabled || !self.claim() {
            return Ok(None);
        }

        self.run_cleanup(self.config.session_retention_days)
            .await
            .map(Some)
    }

    /// Periodic cleanup, including the audit log.
    #[must_use]
    pub fn spawn(&self, every: std::time::Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = service.run_cleanup(service.config.session_retention_days).await {
                    error!(error = %e, "Scheduled session cleanup failed");
                }
                if let Err(e) = service.audit.cleanup(service.audit_retention_days).await {
                    error!(error = %e, "Scheduled audit cleanup failed");
                }
            }
        })
    }
}
