use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};

use crate::entities::{prelude::*, sessions};

pub struct SessionRepository {
    conn: DatabaseConnection,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, session: sessions::ActiveModel) -> Result<sessions::Model> {
        session
            .insert(&self.conn)
            .await
            .context("Failed to insert session")
    }

    pub async fn get(&self, id: &str) -> Result<Option<sessions::Model>> {
        Sessions::find_by_id(id.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query session")
    }

    pub async fn get_for_user(&self, id: &str, user_id: i32) -> Result<Option<sessions::Model>> {
        Sessions::find_by_id(id.to_string())
            .filter(sessions::Column::UserId.eq(user_id))
            .one(&self.conn)
            .await
            .context("Failed to query session for user")
    }

    pub async fn rotation_count(&self, id: &str) -> Result<Option<i32>> {
        let count = Sessions::find_by_id(id.to_string())
            .select_only()
            .column(sessions::Column::RotationCount)
            .into_tuple::<i32>()
            .one(&self.conn)
            .await
            .context("Failed to read rotation count")?;

        Ok(count)
    }

    pub async fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        Sessions::update_many()
            .col_expr(sessions::Column::LastActiveAt, Expr::value(now))
            .filter(sessions::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to bump last_active_at")?;

        Ok(())
    }

    /// Creation time of the first session rotated from `parent_id`.
    pub async fn first_child_created_at(&self, parent_id: &str) -> Result<Option<DateTime<Utc>>> {
        let created = Sessions::find()
            .select_only()
            .column(sessions::Column::CreatedAt)
            .filter(sessions::Column::ParentSessionId.eq(parent_id))
            .order_by_asc(sessions::Column::CreatedAt)
            .into_tuple::<DateTime<Utc>>()
            .one(&self.conn)
            .await
            .context("Failed to query child session")?;

        Ok(created)
    }

    /// Revokes the parent and inserts its rotated child in one transaction.
    ///
    /// The revoke is conditional on the parent still being live. When it
    /// matches no row the transaction is rolled back and `None` is returned,
    /// so a parent never gets a second child and a revoked family never
    /// gains a live member.
    pub async fn insert_child_revoking_parent(
        &self,
        child: sessions::ActiveModel,
        parent_id: &str,
    ) -> Result<Option<sessions::Model>> {
        let txn = self
            .conn
            .begin()
            .await
            .context("Failed to open rotation transaction")?;

        let revoked = Sessions::update_many()
            .col_expr(sessions::Column::Revoked, Expr::value(true))
            .filter(sessions::Column::Id.eq(parent_id))
            .filter(sessions::Column::Revoked.eq(false))
            .exec(&txn)
            .await
            .context("Failed to revoke parent session")?;

        if revoked.rows_affected != 1 {
            txn.rollback()
                .await
                .context("Failed to roll back rotation transaction")?;
            return Ok(None);
        }

        let child = child
            .insert(&txn)
            .await
            .context("Failed to insert rotated session")?;

        txn.commit()
            .await
            .context("Failed to commit rotation transaction")?;

        Ok(Some(child))
    }

    /// Revokes one session. Returns `false` if it was already revoked or
    /// does not exist.
    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::Revoked, Expr::value(true))
            .filter(sessions::Column::Id.eq(id))
            .filter(sessions::Column::Revoked.eq(false))
            .exec(&self.conn)
            .await
            .context("Failed to revoke session")?;

        Ok(result.rows_affected == 1)
    }

    pub async fn revoke_for_user(&self, id: &str, user_id: i32) -> Result<bool> {
        let result = Sessions::update_many()
            .col_expr(sessions::Column::Revoked, Expr::value(true))
            .filter(sessions::Column::Id.eq(id))
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::Revoked.eq(false))
            .exec(&self.conn)
            .await
            .context("Failed to revoke user session")?;

        Ok(result.rows_affected == 1)
    }

    /// Revokes every live session matching `filter` with a single
    /// `UPDATE ... RETURNING`, yielding exactly the rows it flipped.
    async fn revoke_matching(&self, filter: Condition) -> Result<Vec<sessions::Model>> {
        Sessions::update_many()
            .col_expr(sessions::Column::Revoked, Expr::value(true))
            .filter(filter)
            .filter(sessions::Column::Revoked.eq(false))
            .exec_with_returning(&self.conn)
            .await
            .context("Failed to revoke sessions")
    }

    pub async fn revoke_family(&self, token_family: &str) -> Result<Vec<sessions::Model>> {
        self.revoke_matching(Condition::all().add(sessions::Column::TokenFamily.eq(token_family)))
            .await
    }

    pub async fn revoke_all_for_user(&self, user_id: i32) -> Result<Vec<sessions::Model>> {
        self.revoke_matching(Condition::all().add(sessions::Column::UserId.eq(user_id)))
            .await
    }

    pub async fn revoke_all_except(
        &self,
        user_id: i32,
        keep_session_id: &str,
    ) -> Result<Vec<sessions::Model>> {
        self.revoke_matching(
            Condition::all()
                .add(sessions::Column::UserId.eq(user_id))
                .add(sessions::Column::Id.ne(keep_session_id)),
        )
        .await
    }

    pub async fn family(&self, token_family: &str) -> Result<Vec<sessions::Model>> {
        Sessions::find()
            .filter(sessions::Column::TokenFamily.eq(token_family))
            .order_by_asc(sessions::Column::RotationCount)
            .all(&self.conn)
            .await
            .context("Failed to query token family")
    }

    pub async fn list_active(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<sessions::Model>> {
        Sessions::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::Revoked.eq(false))
            .filter(sessions::Column::ExpiresAt.gt(now))
            .order_by_desc(sessions::Column::LastActiveAt)
            .all(&self.conn)
            .await
            .context("Failed to list active sessions")
    }

    pub async fn count_created_since(&self, user_id: i32, since: DateTime<Utc>) -> Result<u64> {
        Sessions::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::CreatedAt.gte(since))
            .count(&self.conn)
            .await
            .context("Failed to count recent sessions")
    }

    /// Deletes sessions that expired, or were revoked and unused, before
    /// `cutoff`.
    pub async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = Sessions::delete_many()
            .filter(
                Condition::any()
                    .add(sessions::Column::ExpiresAt.lt(cutoff))
                    .add(
                        Condition::all()
                            .add(sessions::Column::Revoked.eq(true))
                            .add(sessions::Column::LastActiveAt.lt(cutoff)),
                    ),
            )
            .exec(&self.conn)
            .await
            .context("Failed to delete stale sessions")?;

        Ok(result.rows_affected)
    }

    /// Nulls `parent_session_id` references to sessions that no longer exist.
    pub async fn clear_orphaned_parents(&self) -> Result<u64> {
        let existing_ids = Query::select()
            .column(sessions::Column::Id)
            .from(Sessions)
            .to_owned();

        let result = Sessions::update_many()
            .col_expr(
                sessions::Column::ParentSessionId,
                Expr::value(Option::<String>::None),
            )
            .filter(sessions::Column::ParentSessionId.is_not_null())
            .filter(Expr::col(sessions::Column::ParentSessionId).not_in_subquery(existing_ids))
            .exec(&self.conn)
            .await
            .context("Failed to clear orphaned parent references")?;

        Ok(result.rows_affected)
    }
}
