use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use crate::entities::{prelude::*, users};

/// User data returned from the repository (without the password hash)
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub is_admin: bool,
    pub has_password: bool,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            is_admin: model.is_admin,
            has_password: model.password_hash.is_some(),
            failed_attempts: model.failed_attempts,
            locked_until: model.locked_until,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Lockout counters as stored on the user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        email: &str,
        password_hash: Option<String>,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let model = users::ActiveModel {
            email: Set(email.to_string()),
            password_hash: Set(password_hash),
            is_admin: Set(is_admin),
            failed_attempts: Set(0),
            locked_until: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .with_context(|| format!("Failed to create user {email}"))?;

        Ok(User::from(model))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    /// Get user by email together with the stored password hash
    pub async fn get_credentials(&self, email: &str) -> Result<Option<(User, Option<String>)>> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user credentials")?;

        Ok(user.map(|u| {
            let password_hash = u.password_hash.clone();
            (User::from(u), password_hash)
        }))
    }

    pub async fn get_password_hash(&self, id: i32) -> Result<Option<String>> {
        let user = Users::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user password hash")?;

        Ok(user.and_then(|u| u.password_hash))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = Users::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    pub async fn update_password_hash(
        &self,
        id: i32,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = Users::update_many()
            .col_expr(users::Column::PasswordHash, Expr::value(password_hash))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to update password hash")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn lockout_state(&self, id: i32) -> Result<Option<LockoutState>> {
        let user = Users::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query lockout state")?;

        Ok(user.map(|u| LockoutState {
            failed_attempts: u.failed_attempts,
            locked_until: u.locked_until,
        }))
    }

    /// `failed_attempts = failed_attempts + 1` in one statement.
    pub async fn increment_failed_attempts(&self, id: i32, now: DateTime<Utc>) -> Result<bool> {
        let result = Users::update_many()
            .col_expr(
                users::Column::FailedAttempts,
                Expr::col(users::Column::FailedAttempts).add(1),
            )
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to increment failed attempts")?;

        Ok(result.rows_affected == 1)
    }

    /// Sets `locked_until` when the counter has reached `threshold` and no
    /// lock is currently active.
    pub async fn lock_if_threshold_reached(
        &self,
        id: i32,
        threshold: i32,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = Users::update_many()
            .col_expr(users::Column::LockedUntil, Expr::value(Some(until)))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .filter(users::Column::FailedAttempts.gte(threshold))
            .filter(
                sea_orm::Condition::any()
                    .add(users::Column::LockedUntil.is_null())
                    .add(users::Column::LockedUntil.lte(now)),
            )
            .exec(&self.conn)
            .await
            .context("Failed to lock account")?;

        Ok(result.rows_affected == 1)
    }

    /// Clears a lock whose time has passed, resetting the counter too.
    pub async fn clear_expired_lock(&self, id: i32, now: DateTime<Utc>) -> Result<bool> {
        let result = Users::update_many()
            .col_expr(
                users::Column::LockedUntil,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(users::Column::FailedAttempts, Expr::value(0))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .filter(users::Column::LockedUntil.is_not_null())
            .filter(users::Column::LockedUntil.lte(now))
            .exec(&self.conn)
            .await
            .context("Failed to clear expired lock")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn reset_failed_attempts(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        Users::update_many()
            .col_expr(
                users::Column::LockedUntil,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(users::Column::FailedAttempts, Expr::value(0))
            .col_expr(users::Column::UpdatedAt, Expr::value(now))
            .filter(users::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to reset failed attempts")?;

        Ok(())
    }

    pub async fn set_admin(&self, id: i32, is_admin: bool, now: DateTime<Utc>) -> Result<()> {
        let user = Users::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for admin flag")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        active.is_admin = Set(is_admin);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }
}
