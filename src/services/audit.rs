//! Append-only security audit trail.
//!
//! Writes go through a bounded queue drained by a single writer task, so
//! `log` never blocks or fails the caller. Entries that cannot be queued or
//! persisted are reported through `tracing` and counted in
//! `warden_audit_dropped_total`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::clock::SharedClock;
use crate::db::{AuditFilter, NewAuditRecord, Store};
use crate::entities::audit_logs;
use crate::error::{SecurityError, SecurityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailed,
    Logout,
    Register,
    ExternalLogin,
    SessionCreated,
    SessionRotated,
    SessionRevoked,
    TokenReuseDetected,
    RotationLimitExceeded,
    AccountLocked,
    PasswordResetRequested,
    PasswordResetCompleted,
    PasswordChanged,
    RateLimitExceeded,
    CsrfFailed,
}

impl AuditEventType {
    pub const ALL: [Self; 16] = [
        Self::LoginSuccess,
        Self::LoginFailed,
        Self::Logout,
        Self::Register,
        Self::ExternalLogin,
        Self::SessionCreated,
        Self::SessionRotated,
        Self::SessionRevoked,
        Self::TokenReuseDetected,
        Self::RotationLimitExceeded,
        Self::AccountLocked,
        Self::PasswordResetRequested,
        Self::PasswordResetCompleted,
        Self::PasswordChanged,
        Self::RateLimitExceeded,
        Self::CsrfFailed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "auth.login.success",
            Self::LoginFailed => "auth.login.failed",
            Self::Logout => "auth.logout",
            Self::Register => "auth.register",
            Self::ExternalLogin => "auth.oauth.login",
            Self::SessionCreated => "auth.session_created",
            Self::SessionRotated => "auth.session_rotated",
            Self::SessionRevoked => "auth.session_revoked",
            Self::TokenReuseDetected => "auth.token_reuse_detected",
            Self::RotationLimitExceeded => "auth.rotation_limit_exceeded",
            Self::AccountLocked => "auth.account_locked",
            Self::PasswordResetRequested => "auth.password_reset.requested",
            Self::PasswordResetCompleted => "auth.password_reset.completed",
            Self::PasswordChanged => "auth.password_changed",
            Self::RateLimitExceeded => "security.rate_limit.exceeded",
            Self::CsrfFailed => "security.csrf.failed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| SecurityError::Validation(format!("Unknown audit event type: {s}")))
    }
}

/// One audit event before it is timestamped and queued.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub user_id: Option<i32>,
    pub event_data: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
}

impl AuditEntry {
    #[must_use]
    pub const fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            user_id: None,
            event_data: None,
            ip_address: None,
            user_agent: None,
            success: true,
        }
    }

    #[must_use]
    pub const fn user(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = Some(data);
        self
    }

    #[must_use]
    pub fn client(mut self, ip: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    #[must_use]
    pub const fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Persistence behind the audit writer.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: NewAuditRecord) -> Result<()>;
}

#[async_trait]
impl AuditSink for Store {
    async fn append(&self, record: NewAuditRecord) -> Result<()> {
        self.add_audit_record(record).await
    }
}

enum AuditMessage {
    Record(NewAuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Audit row as returned to administrators.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i32>,
    pub event_type: String,
    pub event_data: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl From<audit_logs::Model> for AuditRecord {
    fn from(model: audit_logs::Model) -> Self {
        let event_data = model.event_data.map(|raw| {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        });

        Self {
            id: model.id,
            user_id: model.user_id,
            event_type: model.event_type,
            event_data,
            ip_address: model.ip_address,
            user_agent: model.user_agent,
            success: model.success,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub user_id: Option<i32>,
    pub event_type: Option<String>,
    pub success: Option<bool>,
    pub ip_address: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditRecord>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedLoginReport {
    pub total: u64,
    pub items: Vec<AuditRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSecuritySummary {
    pub user_id: i32,
    pub total_events: u64,
    pub unique_ips: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub recent_sessions: u64,
    pub failed_logins: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousIp {
    pub ip_address: String,
    pub failed_attempts: i64,
}

const MAX_PAGE_SIZE: u64 = 500;

#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditMessage>,
    store: Store,
    clock: SharedClock,
}

impl AuditLogger {
    /// Starts the writer task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        sink: Arc<dyn AuditSink>,
        store: Store,
        clock: SharedClock,
        queue_capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditMessage>(queue_capacity.max(1));

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    AuditMessage::Record(record) => {
                        let event_type = record.event_type.clone();
                        if let Err(e) = sink.append(record).await {
                            metrics::counter!("warden_audit_dropped_total").increment(1);
                            error!(
                                event_type = %event_type,
                                error = %format!("{e:#}"),
                                "Failed to persist audit record"
                            );
                        }
                    }
                    AuditMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, store, clock }
    }

    /// Queues an entry. Never fails and never waits.
    pub fn log(&self, entry: AuditEntry) {
        let record = NewAuditRecord {
            user_id: entry.user_id,
            event_type: entry.event_type.as_str().to_string(),
            event_data: entry.event_data.map(|d| d.to_string()),
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            success: entry.success,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.tx.try_send(AuditMessage::Record(record)) {
            metrics::counter!("warden_audit_dropped_total").increment(1);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(
                event_type = entry.event_type.as_str(),
                reason, "Dropping audit record"
            );
        }
    }

    /// Resolves once every entry queued before the call reached the sink.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub async fn query(&self, query: &AuditQuery) -> SecurityResult<AuditPage> {
        if let Some(event_type) = &query.event_type {
            AuditEventType::from_str(event_type)?;
        }

        let filter = AuditFilter {
            user_id: query.user_id,
            event_type: query.event_type.clone(),
            success: query.success,
            ip_address: query.ip_address.clone(),
            since: query.since,
            until: query.until,
        };

        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);

        let (items, total, total_pages) =
            self.store.get_audit_logs(&filter, page, page_size).await?;

        Ok(AuditPage {
            items: items.into_iter().map(AuditRecord::from).collect(),
            total,
            page,
            page_size,
            total_pages,
        })
    }

    pub async fn failed_logins(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> SecurityResult<FailedLoginReport> {
        let filter = AuditFilter {
            event_type: Some(AuditEventType::LoginFailed.as_str().to_string()),
            success: Some(false),
            since: Some(since),
            ..Default::default()
        };

        let total = self.store.count_audit_logs(&filter).await?;
        let items = self
            .store
            .get_all_audit_logs(&filter, limit.clamp(1, MAX_PAGE_SIZE))
            .await?;

        Ok(FailedLoginReport {
            total,
            items: items.into_iter().map(AuditRecord::from).collect(),
        })
    }

    pub async fn user_summary(
        &self,
        user_id: i32,
        since: DateTime<Utc>,
    ) -> SecurityResult<UserSecuritySummary> {
        let all_events = AuditFilter {
            user_id: Some(user_id),
            since: Some(since),
            ..Default::default()
        };
        let failed = AuditFilter {
            event_type: Some(AuditEventType::LoginFailed.as_str().to_string()),
            success: Some(false),
            ..all_events.clone()
        };

        let total_events = self.store.count_audit_logs(&all_events).await?;
        let failed_logins = self.store.count_audit_logs(&failed).await?;
        let unique_ips = self.store.distinct_audit_ips(user_id, since).await?;
        let last_login = self
            .store
            .latest_audit_record(user_id, AuditEventType::LoginSuccess.as_str(), true)
            .await?;
        let recent_sessions = self.store.count_sessions_since(user_id, since).await?;

        Ok(UserSecuritySummary {
            user_id,
            total_events,
            unique_ips,
            last_login_at: last_login.as_ref().map(|l| l.created_at),
            last_login_ip: last_login.and_then(|l| l.ip_address),
            recent_sessions,
            failed_logins,
        })
    }

    /// IPs with at least `threshold` failed logins since `since`.
    pub async fn suspicious_ips(
        &self,
        threshold: i64,
        since: DateTime<Utc>,
    ) -> SecurityResult<Vec<SuspiciousIp>> {
        let rows = self
            .store
            .ips_with_failures(AuditEventType::LoginFailed.as_str(), since, threshold.max(1))
            .await?;

        Ok(rows
            .into_iter()
            .map(|(ip_address, failed_attempts)| SuspiciousIp {
                ip_address,
                failed_attempts,
            })
            .collect())
    }

    pub async fn cleanup(&self, older_than_days: i64) -> SecurityResult<u64> {
        if older_than_days < 1 {
            return Err(SecurityError::Validation(
                "Retention must be at least one day".to_string(),
            ));
        }

        let cutoff = self.clock.now() - Duration::days(older_than_days);
        let deleted = self.store.prune_audit_logs(cutoff).await?;
        tracing::info!(deleted, older_than_days, "Pruned audit log");
        Ok(deleted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Mutex;

    pub(crate) async fn test_store() -> Store {
        let path = std::env::temp_dir().join(format!("warden-test-{}.db", uuid::Uuid::new_v4()));
        Store::with_pool_options(&format!("sqlite:{}", path.display()), 2, 1)
            .await
            .unwrap()
    }

    #[derive(Default)]
    pub(crate) struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _record: NewAuditRecord) -> Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<NewAuditRecord>>);

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn append(&self, record: NewAuditRecord) -> Result<()> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for event in AuditEventType::ALL {
            assert_eq!(AuditEventType::from_str(event.as_str()).unwrap(), event);
        }
        assert!(AuditEventType::from_str("auth.nope").is_err());
    }

    #[tokio::test]
    async fn flush_waits_for_queued_entries() {
        let store = test_store().await;
        let sink = Arc::new(MemorySink::default());
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::new(sink.clone(), store, clock, 16);

        logger.log(AuditEntry::new(AuditEventType::LoginSuccess).user(1));
        logger.log(
            AuditEntry::new(AuditEventType::LoginFailed)
                .client(Some("1.2.3.4"), None)
                .failed(),
        );
        logger.flush().await;

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].event_type, "auth.login.failed");
        assert!(!records[1].success);
        assert_eq!(records[1].ip_address.as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::new(Arc::new(FailingSink), store, clock, 4);

        logger.log(AuditEntry::new(AuditEventType::AccountLocked));
        logger.flush().await;
        logger.log(AuditEntry::new(AuditEventType::AccountLocked));
        logger.flush().await;
    }

    #[tokio::test]
    async fn query_and_suspicious_ips() {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::new(Arc::new(store.clone()), store, clock.clone(), 64);

        for _ in 0..4 {
            logger.log(
                AuditEntry::new(AuditEventType::LoginFailed)
                    .client(Some("10.0.0.1"), None)
                    .failed(),
            );
        }
        logger.log(
            AuditEntry::new(AuditEventType::LoginFailed)
                .client(Some("10.0.0.2"), None)
                .failed(),
        );
        logger.log(AuditEntry::new(AuditEventType::Logout));
        logger.flush().await;

        let since = clock.now() - Duration::hours(1);
        let ips = logger.suspicious_ips(3, since).await.unwrap();
        assert_eq!(
            ips,
            vec![SuspiciousIp {
                ip_address: "10.0.0.1".to_string(),
                failed_attempts: 4
            }]
        );

        let page = logger
            .query(&AuditQuery {
                event_type: Some("auth.login.failed".to_string()),
                page_size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 3);

        let failed = logger.failed_logins(since, 10).await.unwrap();
        assert_eq!(failed.total, 5);

        assert!(
            logger
                .query(&AuditQuery {
                    event_type: Some("bogus".to_string()),
                    ..Default::default()
                })
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn cleanup_removes_old_rows() {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::new(Arc::new(store.clone()), store, clock.clone(), 16);

        logger.log(AuditEntry::new(AuditEventType::Logout));
        logger.flush().await;

        clock.advance(Duration::days(100));
        logger.log(AuditEntry::new(AuditEventType::Logout));
        logger.flush().await;

        assert_eq!(logger.cleanup(90).await.unwrap(), 1);
        assert!(logger.cleanup(0).await.is_err());
    }
}
