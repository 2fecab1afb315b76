//! Single-use password reset tokens.
//!
//! Only the sha-256 of a token is stored. Issuing a token for a user
//! invalidates every earlier unused token of that user.

use chrono::{DateTime, Duration, Utc};

use crate::clock::SharedClock;
use crate::db::Store;
use crate::error::{SecurityError, SecurityResult};
use crate::services::tokens;

#[derive(Debug, Clone)]
pub struct IssuedResetToken {
    /// Plaintext, handed to the user exactly once.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PasswordResetService {
    store: Store,
    clock: SharedClock,
    ttl: Duration,
}

impl PasswordResetService {
    #[must_use]
    pub fn new(store: Store, clock: SharedClock, ttl_minutes: i64) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub async fn create_token(&self, user_id: i32) -> SecurityResult<IssuedResetToken> {
        let now = self.clock.now();
        let token = tokens::generate_token();
        let expires_at = now + self.ttl;

        self.store
            .replace_reset_token(user_id, &tokens::hash_token(&token), expires_at, now)
            .await?;

        Ok(IssuedResetToken { token, expires_at })
    }

    /// Marks the token used and returns its owner. Unknown, used and
    /// expired tokens all fail the same way.
    pub async fn consume_token(&self, token: &str) -> SecurityResult<i32> {
        if token.trim().is_empty() {
            return Err(SecurityError::InvalidResetToken);
        }

        self.store
            .consume_reset_token(&tokens::hash_token(token.trim()), self.clock.now())
            .await?
            .ok_or(SecurityError::InvalidResetToken)
    }

    pub async fn cleanup(&self, older_than_days: i64) -> SecurityResult<u64> {
        let cutoff = self.clock.now() - Duration::days(older_than_days.max(0));
        Ok(self.store.prune_reset_tokens(cutoff).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::services::audit::tests::test_store;
    use std::sync::Arc;

    async fn service() -> (PasswordResetService, Arc<ManualClock>, i32) {
        let store = test_store().await;
        let clock = Arc::new(ManualClock::starting_now());
        let user = store
            .create_user("reset@example.com", None, false, clock.now())
            .await
            .unwrap();
        (
            PasswordResetService::new(store, clock.clone(), 60),
            clock,
            user.id,
        )
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (service, _, user_id) = service().await;
        let issued = service.create_token(user_id).await.unwrap();

        assert_eq!(service.consume_token(&issued.token).await.unwrap(), user_id);
        assert!(matches!(
            service.consume_token(&issued.token).await,
            Err(SecurityError::InvalidResetToken)
        ));
    }

    #[tokio::test]
    async fn new_token_invalidates_previous() {
        let (service, _, user_id) = service().await;
        let first = service.create_token(user_id).await.unwrap();
        let second = service.create_token(user_id).await.unwrap();

        assert!(service.consume_token(&first.token).await.is_err());
        assert_eq!(service.consume_token(&second.token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (service, clock, user_id) = service().await;
        let issued = service.create_token(user_id).await.unwrap();

        clock.advance(Duration::minutes(61));
        assert!(service.consume_token(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_prunes_used_and_expired() {
        let (service, clock, user_id) = service().await;
        let issued = service.create_token(user_id).await.unwrap();
        service.consume_token(&issued.token).await.unwrap();

        clock.advance(Duration::days(2));
        assert_eq!(service.cleanup(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let (service, _, _) = service().await;
        assert!(service.consume_token("nope").await.is_err());
        assert!(service.consume_token("  ").await.is_err());
    }
}
