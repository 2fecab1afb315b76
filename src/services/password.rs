//! Argon2id credential hashing.
//!
//! Hashing and verification are CPU bound and run on the blocking pool so
//! they never stall the async runtime.

use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use tokio::task;

use crate::config::SecurityConfig;

#[async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String>;

    /// `Ok(false)` on mismatch. Malformed stored hashes are errors.
    async fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    memory_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl Argon2Hasher {
    #[must_use]
    pub const fn new(config: &SecurityConfig) -> Self {
        Self {
            memory_cost_kib: config.argon2_memory_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_cost_kib, self.time_cost, self.parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[async_trait]
impl CredentialHasher for Argon2Hasher {
    async fn hash(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2()?;
        let password = password.to_string();

        task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))
        })
        .await
        .context("Password hashing task panicked")?
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let password = password.to_string();
        let hash = hash.to_string();

        // Parameters are read from the PHC string, so older hashes still verify.
        task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

            match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(anyhow::anyhow!("Password verification failed: {e}")),
            }
        })
        .await
        .context("Password verification task panicked")?
    }
}

/// Hash verified against unknown accounts so a missing user costs the same
/// as a wrong password.
pub(crate) const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$yBqGJ5cWzqGf7Uq8c2Ki3g0ZBPxq3JgEJ1kq8mQ2bS0";

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2Hasher {
        Argon2Hasher::new(&SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            min_password_length: 8,
        })
    }

    #[tokio::test]
    async fn hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct-horse").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct-horse", &hash).await.unwrap());
        assert!(!hasher.verify("wrong-horse", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn dummy_hash_parses_and_rejects() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("anything", DUMMY_HASH).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        assert!(fast_hasher().verify("pw", "not-a-hash").await.is_err());
    }
}
