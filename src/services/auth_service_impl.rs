//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::db::{Store, User};
use crate::error::{SecurityError, SecurityResult};
use crate::services::SecurityServices;
use crate::services::audit::{AuditEntry, AuditEventType};
use crate::services::auth_service::{
    AuthService, AuthenticatedSession, ClientContext, ExternalIdentity, UserInfo,
};
use crate::services::notifier::{self, Notification};
use crate::services::password::DUMMY_HASH;
use crate::services::rate_limit::{LimiterKind, RateLimitKey};
use crate::services::session::{NewSession, SessionData};
use crate::services::tokens::{normalize_email, valid_email};

pub struct SeaOrmAuthService {
    store: Store,
    services: SecurityServices,
    security: SecurityConfig,
    public_base_url: String,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        services: SecurityServices,
        security: SecurityConfig,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            services,
            security,
            public_base_url,
        }
    }

    fn validate_new_password(&self, password: &str) -> SecurityResult<()> {
        if password.chars().count() < self.security.min_password_length {
            return Err(SecurityError::Validation(format!(
                "Password must be at least {} characters",
                self.security.min_password_length
            )));
        }
        Ok(())
    }

    async fn start_session(
        &self,
        user: User,
        remember_me: bool,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession> {
        let session = self
            .services
            .sessions
            .create_session(NewSession {
                user_id: user.id,
                is_admin: user.is_admin,
                remember_me,
                ip: ctx.ip.clone(),
                user_agent: ctx.user_agent.clone(),
                parent_session_id: None,
                token_family: None,
            })
            .await?;

        // Opportunistic cleanup, off the request path.
        let maintenance = self.services.maintenance.clone();
        tokio::spawn(async move {
            if let Err(e) = maintenance.maybe_run().await {
                warn!(error = %e, "Opportunistic cleanup failed");
            }
        });

        Ok(AuthenticatedSession {
            user: UserInfo::from(user),
            session,
        })
    }

    fn audit_login_failure(&self, user_id: Option<i32>, reason: &str, ctx: &ClientContext) {
        let mut entry = AuditEntry::new(AuditEventType::LoginFailed)
            .client(ctx.ip(), ctx.user_agent())
            .data(json!({ "reason": reason }))
            .failed();
        entry.user_id = user_id;
        self.services.audit.log(entry);
    }

    fn notify(&self, notification: Notification) {
        notifier::dispatch(&self.services.notifier, notification);
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(
        &self,
        email: &str,
        password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession> {
        self.services.rate_limiter.check_register(ctx.ip())?;

        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(SecurityError::Validation("Invalid email address".to_string()));
        }
        self.validate_new_password(password)?;

        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(SecurityError::Validation(
                "Unable to register with this email".to_string(),
            ));
        }

        let hash = self.services.hasher.hash(password).await?;
        let user = self
            .store
            .create_user(&email, Some(hash), false, self.services.clock.now())
            .await?;

        info!(user_id = user.id, "User registered");
        self.services.audit.log(
            AuditEntry::new(AuditEventType::Register)
                .user(user.id)
                .client(ctx.ip(), ctx.user_agent()),
        );

        self.start_session(user, false, ctx).await
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession> {
        let email = normalize_email(email);
        self.services.rate_limiter.check_login(ctx.ip(), &email)?;

        let Some((user, stored_hash)) = self.store.get_user_credentials(&email).await? else {
            // Same cost as a real check.
            let _ = self.services.hasher.verify(password, DUMMY_HASH).await;
            self.audit_login_failure(None, "unknown_user", ctx);
            return Err(SecurityError::InvalidCredentials);
        };

        let status = self.services.lockout.check_lockout(user.id).await?;
        if status.is_locked {
            self.audit_login_failure(Some(user.id), "account_locked", ctx);
            return Err(SecurityError::AccountLocked {
                remaining_ms: status.remaining_ms.unwrap_or(0),
            });
        }

        let verified = match stored_hash.as_deref() {
            Some(hash) => self.services.hasher.verify(password, hash).await?,
            None => {
                let _ = self.services.hasher.verify(password, DUMMY_HASH).await;
                false
            }
        };

        if !verified {
            let outcome = self
                .services
                .lockout
                .record_failed_login(user.id, ctx.ip(), ctx.user_agent())
                .await?;
            self.audit_login_failure(Some(user.id), "bad_password", ctx);
            info!(
                user_id = user.id,
                failed_attempts = outcome.failed_attempts,
                "Login failed"
            );
            return Err(SecurityError::InvalidCredentials);
        }

        self.services.lockout.reset_failed_attempts(user.id).await?;
        self.services
            .rate_limiter
            .reset(&RateLimitKey::new(LimiterKind::LoginByEmail, &email));

        let user_id = user.id;
        let authenticated = self.start_session(user, remember_me, ctx).await?;

        self.services.audit.log(
            AuditEntry::new(AuditEventType::LoginSuccess)
                .user(user_id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({
                    "session_id": authenticated.session.session_id,
                    "remember_me": remember_me,
                })),
        );

        Ok(authenticated)
    }

    async fn login_external(
        &self,
        identity: &ExternalIdentity,
        remember_me: bool,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession> {
        let email = normalize_email(&identity.email);
        if !valid_email(&email) {
            return Err(SecurityError::Validation("Invalid email address".to_string()));
        }

        let user = match self.store.get_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let user = self
                    .store
                    .create_user(&email, None, false, self.services.clock.now())
                    .await?;
                self.services.audit.log(
                    AuditEntry::new(AuditEventType::Register)
                        .user(user.id)
                        .client(ctx.ip(), ctx.user_agent())
                        .data(json!({ "provider": identity.provider })),
                );
                user
            }
        };

        let status = self.services.lockout.check_lockout(user.id).await?;
        if status.is_locked {
            self.audit_login_failure(Some(user.id), "account_locked", ctx);
            return Err(SecurityError::AccountLocked {
                remaining_ms: status.remaining_ms.unwrap_or(0),
            });
        }

        let user_id = user.id;
        let authenticated = self.start_session(user, remember_me, ctx).await?;

        self.services.audit.log(
            AuditEntry::new(AuditEventType::ExternalLogin)
                .user(user_id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({
                    "provider": identity.provider,
                    "subject": identity.subject,
                    "session_id": authenticated.session.session_id,
                })),
        );

        Ok(authenticated)
    }

    async fn refresh(
        &self,
        session: &SessionData,
        ctx: &ClientContext,
    ) -> SecurityResult<SessionData> {
        self.services
            .sessions
            .rotate_session(session, ctx.ip(), ctx.user_agent())
            .await
    }

    async fn logout(&self, session: &SessionData, ctx: &ClientContext) -> SecurityResult<()> {
        self.services
            .sessions
            .revoke_session(&session.session_id, session.user_id)
            .await?;

        self.services.audit.log(
            AuditEntry::new(AuditEventType::Logout)
                .user(session.user_id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({ "session_id": session.session_id })),
        );

        Ok(())
    }

    async fn request_password_reset(
        &self,
        email: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<()> {
        self.services.rate_limiter.check_password_reset(ctx.ip())?;

        let email = normalize_email(email);
        let Some(user) = self.store.get_user_by_email(&email).await? else {
            self.services.audit.log(
                AuditEntry::new(AuditEventType::PasswordResetRequested)
                    .client(ctx.ip(), ctx.user_agent())
                    .data(json!({ "reason": "unknown_user" }))
                    .failed(),
            );
            return Ok(());
        };

        let issued = self.services.password_resets.create_token(user.id).await?;
        let reset_url = format!(
            "{}/reset-password#token={}",
            self.public_base_url.trim_end_matches('/'),
            issued.token
        );

        self.services.audit.log(
            AuditEntry::new(AuditEventType::PasswordResetRequested)
                .user(user.id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({ "expires_at": issued.expires_at })),
        );

        self.notify(Notification::PasswordReset {
            user_id: user.id,
            email: user.email,
            reset_url,
            expires_at: issued.expires_at,
        });

        Ok(())
    }

    async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<()> {
        self.validate_new_password(new_password)?;

        let user_id = self.services.password_resets.consume_token(token).await?;
        let hash = self.services.hasher.hash(new_password).await?;
        self.store
            .update_user_password_hash(user_id, hash, self.services.clock.now())
            .await?;

        let revoked = self
            .services
            .sessions
            .revoke_all_for_user(user_id, "password_reset")
            .await?;
        self.services.lockout.reset_failed_attempts(user_id).await?;

        info!(user_id, revoked, "Password reset completed");
        self.services.audit.log(
            AuditEntry::new(AuditEventType::PasswordResetCompleted)
                .user(user_id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({ "revoked_sessions": revoked })),
        );

        if let Some(user) = self.store.get_user(user_id).await? {
            self.notify(Notification::PasswordChanged {
                user_id,
                email: user.email,
            });
        }

        Ok(())
    }

    async fn change_password(
        &self,
        session: &SessionData,
        current_password: &str,
        new_password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<u64> {
        self.validate_new_password(new_password)?;
        if current_password == new_password {
            return Err(SecurityError::Validation(
                "New password must be different from current password".to_string(),
            ));
        }

        let stored = self
            .store
            .get_user_password_hash(session.user_id)
            .await?
            .ok_or_else(|| SecurityError::Validation("Account has no password".to_string()))?;

        if !self.services.hasher.verify(current_password, &stored).await? {
            return Err(SecurityError::Validation(
                "Current password is incorrect".to_string(),
            ));
        }

        let hash = self.services.hasher.hash(new_password).await?;
        self.store
            .update_user_password_hash(session.user_id, hash, self.services.clock.now())
            .await?;

        let revoked = self
            .services
            .sessions
            .revoke_other_sessions(session.user_id, &session.session_id)
            .await?;

        self.services.audit.log(
            AuditEntry::new(AuditEventType::PasswordChanged)
                .user(session.user_id)
                .client(ctx.ip(), ctx.user_agent())
                .data(json!({ "revoked_sessions": revoked })),
        );

        if let Some(user) = self.store.get_user(session.user_id).await? {
            self.notify(Notification::PasswordChanged {
                user_id: user.id,
                email: user.email,
            });
        }

        Ok(revoked)
    }

    async fn get_user(&self, user_id: i32) -> SecurityResult<UserInfo> {
        self.store
            .get_user(user_id)
            .await?
            .map(UserInfo::from)
            .ok_or(SecurityError::InvalidSession)
    }
}
