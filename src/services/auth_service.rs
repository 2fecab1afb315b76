//! Domain service for authentication.
//!
//! Composes rate limiting, lockout, credential checks and the session store
//! into the login, refresh, logout and password flows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::User;
use crate::error::SecurityResult;
use crate::services::session::SessionData;

/// Where a request came from, as far as the server can tell.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientContext {
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// An identity already verified by an external provider.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

/// A freshly established session together with its owner.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: UserInfo,
    pub session: SessionData,
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an account and signs it in.
    async fn register(
        &self,
        email: &str,
        password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession>;

    /// # Errors
    ///
    /// [`SecurityError::InvalidCredentials`](crate::error::SecurityError::InvalidCredentials)
    /// for unknown users and wrong passwords alike,
    /// `AccountLocked` while a lockout is active and `RateLimited` when the
    /// IP or the email exceeded its budget.
    async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession>;

    /// Signs in a user whose identity was verified elsewhere, creating the
    /// account on first use.
    async fn login_external(
        &self,
        identity: &ExternalIdentity,
        remember_me: bool,
        ctx: &ClientContext,
    ) -> SecurityResult<AuthenticatedSession>;

    async fn refresh(&self, session: &SessionData, ctx: &ClientContext)
    -> SecurityResult<SessionData>;

    async fn logout(&self, session: &SessionData, ctx: &ClientContext) -> SecurityResult<()>;

    /// Always succeeds for well-formed input so callers cannot probe for
    /// registered emails.
    async fn request_password_reset(&self, email: &str, ctx: &ClientContext)
    -> SecurityResult<()>;

    /// Sets a new password and ends every session of the user.
    async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<()>;

    /// Returns how many other sessions were ended.
    async fn change_password(
        &self,
        session: &SessionData,
        current_password: &str,
        new_password: &str,
        ctx: &ClientContext,
    ) -> SecurityResult<u64>;

    async fn get_user(&self, user_id: i32) -> SecurityResult<UserInfo>;
}
