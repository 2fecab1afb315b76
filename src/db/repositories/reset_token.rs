use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};

use crate::entities::{password_reset_tokens, prelude::*};

pub struct ResetTokenRepository {
    conn: DatabaseConnection,
}

impl ResetTokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Drops every unused token of the user and stores the new one.
    pub async fn replace_for_user(
        &self,
        user_id: i32,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let txn = self
            .conn
            .begin()
            .await
            .context("Failed to open reset token transaction")?;

        PasswordResetTokens::delete_many()
            .filter(password_reset_tokens::Column::UserId.eq(user_id))
            .filter(password_reset_tokens::Column::UsedAt.is_null())
            .exec(&txn)
            .await
            .context("Failed to invalidate previous reset tokens")?;

        password_reset_tokens::ActiveModel {
            token_hash: Set(token_hash.to_string()),
            user_id: Set(user_id),
            expires_at: Set(expires_at),
            used_at: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .context("Failed to insert reset token")?;

        txn.commit()
            .await
            .context("Failed to commit reset token transaction")?;

        Ok(())
    }

    /// Marks the token used if it is unused and unexpired, returning its
    /// owner. Only one caller can ever win this update.
    pub async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<i32>> {
        let result = PasswordResetTokens::update_many()
            .col_expr(password_reset_tokens::Column::UsedAt, Expr::value(Some(now)))
            .filter(password_reset_tokens::Column::TokenHash.eq(token_hash))
            .filter(password_reset_tokens::Column::UsedAt.is_null())
            .filter(password_reset_tokens::Column::ExpiresAt.gt(now))
            .exec(&self.conn)
            .await
            .context("Failed to consume reset token")?;

        if result.rows_affected != 1 {
            return Ok(None);
        }

        let user_id = PasswordResetTokens::find()
            .select_only()
            .column(password_reset_tokens::Column::UserId)
            .filter(password_reset_tokens::Column::TokenHash.eq(token_hash))
            .into_tuple::<i32>()
            .one(&self.conn)
            .await
            .context("Failed to read reset token owner")?;

        Ok(user_id)
    }

    /// Removes used tokens and tokens that expired before `cutoff`.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = PasswordResetTokens::delete_many()
            .filter(
                Condition::any()
                    .add(password_reset_tokens::Column::ExpiresAt.lt(cutoff))
                    .add(password_reset_tokens::Column::UsedAt.lt(cutoff)),
            )
            .exec(&self.conn)
            .await
            .context("Failed to prune reset tokens")?;

        Ok(result.rows_affected)
    }
}
