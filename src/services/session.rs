//! Session store and refresh-token rotation.
//!
//! Every login starts a token family. Each rotation inserts a child session
//! and revokes its parent in one transaction. Presenting an already-rotated
//! refresh token after the grace window is treated as theft and revokes the
//! whole family.

use chrono::{DateTime, Duration, Utc};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::db::Store;
use crate::entities::sessions;
use crate::error::{SecurityError, SecurityResult};
use crate::services::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::services::device;
use crate::services::notifier::{self, Notification, Notifier};
use crate::services::tokens;

/// Parameters for a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: i32,
    pub is_admin: bool,
    pub remember_me: bool,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Set when the session continues an existing chain.
    pub parent_session_id: Option<String>,
    pub token_family: Option<String>,
}

/// What the client holds. The refresh token is only ever returned here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: i32,
    pub session_id: String,
    pub token_family: String,
    pub is_admin: bool,
    pub refresh_token: String,
    pub remember_me: bool,
    pub access_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub id: String,
    pub device: String,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

impl ActiveSession {
    fn from_model(model: sessions::Model, current_session_id: Option<&str>) -> Self {
        Self {
            device: device::describe(model.browser.as_deref(), model.os.as_deref()),
            is_current: current_session_id == Some(model.id.as_str()),
            id: model.id,
            device_type: model.device_type,
            browser: model.browser,
            os: model.os,
            ip_address: model.ip_address,
            created_at: model.created_at,
            last_active_at: model.last_active_at,
            expires_at: model.expires_at,
        }
    }
}

#[derive(Clone)]
pub struct SessionService {
    store: Store,
    config: SessionConfig,
    clock: SharedClock,
    audit: AuditLogger,
    notifier: Arc<dyn Notifier>,
}

impl SessionService {
    #[must_use]
    pub fn new(
        store: Store,
        config: SessionConfig,
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

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn build(
        &self,
        new: &NewSession,
        token_family: String,
        rotation_count: i32,
        now: DateTime<Utc>,
    ) -> (sessions::ActiveModel, SessionData) {
        let session_id = Uuid::new_v4().to_string();
        let refresh_token = tokens::generate_token();

        let lifetime = if new.remember_me {
            Duration::days(self.config.remember_me_days)
        } else {
            Duration::hours(self.config.session_hours)
        };
        let access_expires_at = now + Duration::minutes(self.config.access_token_minutes);
        let info = device::parse_user_agent(new.user_agent.as_deref());

        let model = sessions::ActiveModel {
            id: Set(session_id.clone()),
            user_id: Set(new.user_id),
            token_family: Set(token_family.clone()),
            refresh_token_hash: Set(tokens::hash_token(&refresh_token)),
            parent_session_id: Set(new.parent_session_id.clone()),
            rotation_count: Set(rotation_count),
            revoked: Set(false),
            remember_me: Set(new.remember_me),
            is_admin: Set(new.is_admin),
            expires_at: Set(now + lifetime),
            access_token_expires_at: Set(access_expires_at),
            ip_address: Set(new.ip.clone()),
            user_agent: Set(new.user_agent.clone()),
            device_name: Set(info.device_name),
            device_type: Set(info.device_type),
            browser: Set(info.browser),
            os: Set(info.os),
            created_at: Set(now),
            last_active_at: Set(now),
        };

        let data = SessionData {
            user_id: new.user_id,
            session_id,
            token_family,
            is_admin: new.is_admin,
            refresh_token,
            remember_me: new.remember_me,
            access_expires_at,
        };

        (model, data)
    }

    pub async fn create_session(&self, new: NewSession) -> SecurityResult<SessionData> {
        let now = self.clock.now();

        let (token_family, rotation_count) = match &new.parent_session_id {
            Some(parent_id) => {
                let parent = self
                    .store
                    .get_session(parent_id)
                    .await?
                    .ok_or(SecurityError::InvalidSession)?;
                let family = new.token_family.clone().unwrap_or(parent.token_family);
                (family, parent.rotation_count + 1)
            }
            None => (
                new.token_family
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                0,
            ),
        };

        let (model, data) = self.build(&new, token_family, rotation_count, now);
        self.store.insert_session(model).await?;

        metrics::counter!("warden_sessions_created_total").increment(1);
        self.audit.log(
            AuditEntry::new(AuditEventType::SessionCreated)
                .user(new.user_id)
                .client(new.ip.as_deref(), new.user_agent.as_deref())
                .data(json!({
                    "session_id": data.session_id,
                    "token_family": data.token_family,
                    "remember_me": new.remember_me,
                })),
        );

        Ok(data)
    }

    fn is_live(row: &sessions::Model, presented_hash: &str, now: DateTime<Utc>) -> bool {
        // Evaluate the hash first so timing does not depend on row state.
        let hash_ok = tokens::tokens_match(presented_hash, &row.refresh_token_hash);
        hash_ok && !row.revoked && row.expires_at > now
    }

    /// The only gate for "this caller holds a live session".
    pub async fn validate_session(
        &self,
        session_id: &str,
        user_id: i32,
        refresh_token: &str,
    ) -> SecurityResult<bool> {
        let now = self.clock.now();

        let Some(row) = self.store.get_session_for_user(session_id, user_id).await? else {
            return Ok(false);
        };

        if !Self::is_live(&row, &tokens::hash_token(refresh_token), now) {
            return Ok(false);
        }

        if let Err(e) = self.store.touch_session(session_id, now).await {
            debug!(session_id, error = %e, "Failed to bump last_active_at");
        }

        Ok(true)
    }

    pub async fn rotate_session(
        &self,
        old: &SessionData,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> SecurityResult<SessionData> {
        let now = self.clock.now();

        let row = self
            .store
            .get_session_for_user(&old.session_id, old.user_id)
            .await?
            .ok_or(SecurityError::InvalidSession)?;
        let presented_hash = tokens::hash_token(&old.refresh_token);

        if !Self::is_live(&row, &presented_hash, now) {
            // A genuine token for a session that was already rotated is a replay.
            if row.revoked && tokens::tokens_match(&presented_hash, &row.refresh_token_hash) {
                if self.detect_reuse(&row.id).await? {
                    return Err(SecurityError::BreachDetected);
                }
                if self.store.first_child_created_at(&row.id).await?.is_some() {
                    return Err(SecurityError::RefreshInProgress);
                }
            }
            return Err(SecurityError::InvalidSession);
        }

        if self.detect_reuse(&row.id).await? {
            return Err(SecurityError::BreachDetected);
        }

        let rotation_count = self
            .store
            .get_rotation_count(&row.id)
            .await?
            .ok_or(SecurityError::InvalidSession)?;

        if rotation_count >= self.config.max_rotations {
            self.store.revoke_session(&row.id).await?;
            warn!(
                session_id = %row.id,
                rotation_count, "Rotation limit reached, session revoked"
            );
            self.audit.log(
                AuditEntry::new(AuditEventType::RotationLimitExceeded)
                    .user(row.user_id)
                    .client(ip, user_agent)
                    .data(json!({
                        "session_id": row.id,
                        "token_family": row.token_family,
                        "rotation_count": rotation_count,
                    }))
                    .failed(),
            );
            return Err(SecurityError::RotationLimitExceeded);
        }

        let new = NewSession {
            user_id: row.user_id,
            is_admin: row.is_admin,
            remember_me: row.remember_me,
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            parent_session_id: Some(row.id.clone()),
            token_family: Some(row.token_family.clone()),
        };
        let (model, data) = self.build(&new, row.token_family.clone(), rotation_count + 1, now);

        if self
            .store
            .insert_child_revoking_parent(model, &row.id)
            .await?
            .is_none()
        {
            // Revoked since the liveness check: either a parallel rotation
            // won or the family was revoked underneath us.
            debug!(session_id = %row.id, "Parent no longer live, rotation abandoned");
            if self.store.first_child_created_at(&row.id).await?.is_some() {
                return Err(SecurityError::RefreshInProgress);
            }
            return Err(SecurityError::InvalidSession);
        }

        metrics::counter!("warden_sessions_rotated_total").increment(1);
        self.audit.log(
            AuditEntry::new(AuditEventType::SessionRotated)
                .user(row.user_id)
                .client(ip, user_agent)
                .data(json!({
                    "old_session_id": row.id,
                    "new_session_id": data.session_id,
                    "rotation_count": rotation_count + 1,
                })),
        );

        Ok(data)
    }

    /// True if `session_id` was already rotated longer ago than the grace
    /// window. In that case the whole family has been revoked on return.
    pub async fn detect_reuse(&self, session_id: &str) -> SecurityResult<bool> {
        let Some(first_child_at) = self.store.first_child_created_at(session_id).await? else {
            return Ok(false);
        };

        let elapsed = self.clock.now() - first_child_at;
        if elapsed <= self.config.reuse_grace() {
            debug!(
                session_id,
                elapsed_ms = elapsed.num_milliseconds(),
                "Refresh token reused inside grace window"
            );
            return Ok(false);
        }

        let Some(row) = self.store.get_session(session_id).await? else {
            return Ok(false);
        };

        let revoked = self
            .revoke_family(&row.token_family, "token_reuse_detected")
            .await?;

        metrics::counter!("warden_token_reuse_detected_total").increment(1);
        warn!(
            user_id = row.user_id,
            session_id,
            token_family = %row.token_family,
            revoked,
            "Refresh token reuse detected, family revoked"
        );

        self.audit.log(
            AuditEntry::new(AuditEventType::TokenReuseDetected)
                .user(row.user_id)
                .data(json!({
                    "session_id": session_id,
                    "token_family": row.token_family,
                    "elapsed_ms": elapsed.num_milliseconds(),
                    "revoked_sessions": revoked,
                }))
                .failed(),
        );

        self.notify_suspicious(row.user_id, row.ip_address.clone()).await;

        Ok(true)
    }

    async fn notify_suspicious(&self, user_id: i32, ip_address: Option<String>) {
        let email = match self.store.get_user(user_id).await {
            Ok(Some(user)) => user.email,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id, error = %e, "Could not load user for breach notification");
                return;
            }
        };

        let notification = Notification::SuspiciousActivity {
            user_id,
            email,
            detail: "A refresh token was reused. All sessions of this sign-in were ended."
                .to_string(),
            ip_address,
        };
        notifier::dispatch(&self.notifier, notification);
    }

    fn audit_revoked(&self, revoked: &[sessions::Model], reason: &str) {
        for session in revoked {
            self.audit.log(
                AuditEntry::new(AuditEventType::SessionRevoked)
                    .user(session.user_id)
                    .data(json!({
                        "session_id": session.id,
                        "token_family": session.token_family,
                        "reason": reason,
                    })),
            );
        }
    }

    pub async fn revoke_family(&self, token_family: &str, reason: &str) -> SecurityResult<u64> {
        let revoked = self.store.revoke_token_family(token_family).await?;
        self.audit_revoked(&revoked, reason);
        Ok(revoked.len() as u64)
    }

    /// Revokes one session, but only if it belongs to `user_id`.
    pub async fn revoke_session(&self, session_id: &str, user_id: i32) -> SecurityResult<bool> {
        let revoked = self.store.revoke_user_session(session_id, user_id).await?;

        if revoked {
            self.audit.log(
                AuditEntry::new(AuditEventType::SessionRevoked)
                    .user(user_id)
                    .data(json!({ "session_id": session_id, "reason": "user_revoked" })),
            );
        }

        Ok(revoked)
    }

    pub async fn revoke_other_sessions(
        &self,
        user_id: i32,
        keep_session_id: &str,
    ) -> SecurityResult<u64> {
        let revoked = self
            .store
            .revoke_user_sessions_except(user_id, keep_session_id)
            .await?;
        self.audit_revoked(&revoked, "revoke_others");
        info!(user_id, revoked = revoked.len(), "Revoked other sessions");
        Ok(revoked.len() as u64)
    }

    pub async fn revoke_all_for_user(&self, user_id: i32, reason: &str) -> SecurityResult<u64> {
        let revoked = self.store.revoke_all_user_sessions(user_id).await?;
        self.audit_revoked(&revoked, reason);
        Ok(revoked.len() as u64)
    }

    pub async fn list_active_sessions(
        &self,
        user_id: i32,
        current_session_id: Option<&str>,
    ) -> SecurityResult<Vec<ActiveSession>> {
        let rows = self
            .store
            .list_active_sessions(user_id, self.clock.now())
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ActiveSession::from_model(row, current_session_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::services::audit::tests::{FailingSink, test_store};
    use crate::services::notifier::LogNotifier;

    struct Harness {
        sessions: SessionService,
        store: Store,
        clock: Arc<ManualClock>,
        user_id: i32,
    }

    async fn harness_with(config: SessionConfig) -> Harness {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let audit = AuditLogger::new(Arc::new(store.clone()), store.clone(), clock.clone(), 256);
        let user = store
            .create_user("user@example.com", None, false, clock.now())
            .await
            .unwrap();
        let sessions = SessionService::new(
            store.clone(),
            config,
            clock.clone(),
            audit,
            Arc::new(LogNotifier),
        );
        Harness {
            sessions,
            store,
            clock,
            user_id: user.id,
        }
    }

    async fn harness() -> Harness {
        harness_with(SessionConfig::default()).await
    }

    fn login(user_id: i32) -> NewSession {
        NewSession {
            user_id,
            ip: Some("1.2.3.4".to_string()),
            user_agent: Some(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Chrome/124.0 Safari/537.36"
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn new_login_starts_a_family() {
        let h = harness().await;
        let data = h.sessions.create_session(login(h.user_id)).await.unwrap();

        let row = h.store.get_session(&data.session_id).await.unwrap().unwrap();
        assert_eq!(row.rotation_count, 0);
        assert_eq!(row.token_family, data.token_family);
        assert_ne!(row.refresh_token_hash, data.refresh_token);
        assert_eq!(row.device_name.as_deref(), Some("Chrome on macOS"));
        assert!(row.parent_session_id.is_none());
    }

    #[tokio::test]
    async fn validate_checks_every_condition() {
        let h = harness().await;
        let data = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let s = &h.sessions;

        assert!(s.validate_session(&data.session_id, h.user_id, &data.refresh_token).await.unwrap());
        assert!(!s.validate_session(&data.session_id, h.user_id, "wrong").await.unwrap());
        assert!(!s.validate_session(&data.session_id, h.user_id + 1, &data.refresh_token).await.unwrap());
        assert!(!s.validate_session("missing", h.user_id, &data.refresh_token).await.unwrap());

        h.clock.advance(Duration::hours(25));
        assert!(!s.validate_session(&data.session_id, h.user_id, &data.refresh_token).await.unwrap());

        let fresh = s.create_session(login(h.user_id)).await.unwrap();
        s.revoke_session(&fresh.session_id, h.user_id).await.unwrap();
        assert!(!s.validate_session(&fresh.session_id, h.user_id, &fresh.refresh_token).await.unwrap());
    }

    #[tokio::test]
    async fn remember_me_extends_lifetime() {
        let h = harness().await;
        let data = h
            .sessions
            .create_session(NewSession {
                remember_me: true,
                ..login(h.user_id)
            })
            .await
            .unwrap();

        h.clock.advance(Duration::days(29));
        assert!(
            h.sessions
                .validate_session(&data.session_id, h.user_id, &data.refresh_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn rotation_increments_count_and_revokes_parent() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();

        let parent = h.store.get_session(&first.session_id).await.unwrap().unwrap();
        let child = h.store.get_session(&second.session_id).await.unwrap().unwrap();

        assert!(parent.revoked);
        assert!(!child.revoked);
        assert_eq!(child.rotation_count, parent.rotation_count + 1);
        assert_eq!(child.token_family, parent.token_family);
        assert_eq!(child.parent_session_id.as_deref(), Some(first.session_id.as_str()));
        assert_ne!(second.refresh_token, first.refresh_token);
    }

    #[tokio::test]
    async fn replay_after_grace_revokes_whole_family() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();
        h.clock.advance(Duration::seconds(1));
        let third = h.sessions.rotate_session(&second, None, None).await.unwrap();

        h.clock.advance(Duration::minutes(10));
        let err = h.sessions.rotate_session(&first, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::BreachDetected));

        let family = h.store.get_token_family(&first.token_family).await.unwrap();
        assert_eq!(family.len(), 3);
        assert!(family.iter().all(|s| s.revoked));
        assert!(
            !h.sessions
                .validate_session(&third.session_id, h.user_id, &third.refresh_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn replay_inside_grace_revokes_nothing() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();

        h.clock.advance(Duration::milliseconds(100));
        let err = h.sessions.rotate_session(&first, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::RefreshInProgress));
        assert!(!err.requires_reauthentication());

        assert!(
            h.sessions
                .validate_session(&second.session_id, h.user_id, &second.refresh_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn rotation_write_refuses_revoked_parent() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();

        // Family revoked after the liveness check but before the write.
        h.sessions
            .revoke_family(&second.token_family, "token_reuse_detected")
            .await
            .unwrap();

        let child = NewSession {
            parent_session_id: Some(second.session_id.clone()),
            token_family: Some(second.token_family.clone()),
            ..login(h.user_id)
        };
        let (model, _) = h
            .sessions
            .build(&child, second.token_family.clone(), 2, h.clock.now());
        let written = h
            .store
            .insert_child_revoking_parent(model, &second.session_id)
            .await
            .unwrap();
        assert!(written.is_none());

        let family = h.store.get_token_family(&first.token_family).await.unwrap();
        assert_eq!(family.len(), 2);
        assert!(family.iter().all(|s| s.revoked));

        let err = h.sessions.rotate_session(&second, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::InvalidSession));
    }

    #[tokio::test]
    async fn parent_gets_at_most_one_child() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();

        let child = NewSession {
            parent_session_id: Some(first.session_id.clone()),
            ..login(h.user_id)
        };
        let (winner, _) = h
            .sessions
            .build(&child, first.token_family.clone(), 1, h.clock.now());
        let (loser, _) = h
            .sessions
            .build(&child, first.token_family.clone(), 1, h.clock.now());

        let store = &h.store;
        assert!(store.insert_child_revoking_parent(winner, &first.session_id).await.unwrap().is_some());
        assert!(store.insert_child_revoking_parent(loser, &first.session_id).await.unwrap().is_none());

        let family = store.get_token_family(&first.token_family).await.unwrap();
        assert_eq!(family.len(), 2);
        assert_eq!(family.iter().filter(|s| !s.revoked).count(), 1);
    }

    #[tokio::test]
    async fn family_revocation_reports_only_rows_it_flipped() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();

        let revoked = h
            .store
            .revoke_token_family(&first.token_family)
            .await
            .unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].id, second.session_id);
        assert!(revoked[0].revoked);

        assert!(h.store.revoke_token_family(&first.token_family).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn breach_revokes_family_when_audit_sink_fails() {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let audit = AuditLogger::new(Arc::new(FailingSink), store.clone(), clock.clone(), 4);
        let user = store
            .create_user("user@example.com", None, false, clock.now())
            .await
            .unwrap();
        let sessions = SessionService::new(
            store.clone(),
            SessionConfig::default(),
            clock.clone(),
            audit.clone(),
            Arc::new(LogNotifier),
        );

        let first = sessions.create_session(login(user.id)).await.unwrap();
        let second = sessions.rotate_session(&first, None, None).await.unwrap();
        clock.advance(Duration::minutes(10));

        let err = sessions.rotate_session(&first, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::BreachDetected));
        audit.flush().await;

        let family = store.get_token_family(&first.token_family).await.unwrap();
        assert!(family.iter().all(|s| s.revoked));
        assert!(
            !sessions
                .validate_session(&second.session_id, user.id, &second.refresh_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn forged_token_for_rotated_session_is_not_a_breach() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let second = h.sessions.rotate_session(&first, None, None).await.unwrap();
        h.clock.advance(Duration::minutes(10));

        let forged = SessionData {
            refresh_token: "guessed".to_string(),
            ..first
        };
        let err = h.sessions.rotate_session(&forged, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::InvalidSession));
        assert!(
            h.sessions
                .validate_session(&second.session_id, h.user_id, &second.refresh_token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn rotation_limit_forces_revocation() {
        let h = harness_with(SessionConfig {
            max_rotations: 2,
            ..SessionConfig::default()
        })
        .await;

        let mut current = h.sessions.create_session(login(h.user_id)).await.unwrap();
        for _ in 0..2 {
            current = h.sessions.rotate_session(&current, None, None).await.unwrap();
        }

        let err = h.sessions.rotate_session(&current, None, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::RotationLimitExceeded));
        let row = h.store.get_session(&current.session_id).await.unwrap().unwrap();
        assert!(row.revoked);
        assert_eq!(row.rotation_count, 2);
    }

    #[tokio::test]
    async fn users_only_revoke_their_own_sessions() {
        let h = harness().await;
        let mine = h.sessions.create_session(login(h.user_id)).await.unwrap();

        assert!(!h.sessions.revoke_session(&mine.session_id, h.user_id + 1).await.unwrap());
        assert!(h.sessions.revoke_session(&mine.session_id, h.user_id).await.unwrap());
        assert!(!h.sessions.revoke_session(&mine.session_id, h.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn list_and_revoke_others() {
        let h = harness().await;
        let current = h.sessions.create_session(login(h.user_id)).await.unwrap();
        h.sessions.create_session(login(h.user_id)).await.unwrap();
        h.sessions.create_session(login(h.user_id)).await.unwrap();

        let active = h
            .sessions
            .list_active_sessions(h.user_id, Some(&current.session_id))
            .await
            .unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active.iter().filter(|s| s.is_current).count(), 1);
        assert!(active.iter().all(|s| s.device == "Chrome on macOS"));

        let revoked = h
            .sessions
            .revoke_other_sessions(h.user_id, &current.session_id)
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        let active = h
            .sessions
            .list_active_sessions(h.user_id, Some(&current.session_id))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_current);
    }

    #[tokio::test]
    async fn create_with_parent_continues_chain() {
        let h = harness().await;
        let first = h.sessions.create_session(login(h.user_id)).await.unwrap();
        let child = h
            .sessions
            .create_session(NewSession {
                parent_session_id: Some(first.session_id.clone()),
                ..login(h.user_id)
            })
            .await
            .unwrap();

        assert_eq!(child.token_family, first.token_family);
        let row = h.store.get_session(&child.session_id).await.unwrap().unwrap();
        assert_eq!(row.rotation_count, 1);
    }
}
