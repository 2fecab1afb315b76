use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select, Set,
};

use crate::entities::{audit_logs, prelude::*};

/// Row to append to the audit log.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub user_id: Option<i32>,
    pub event_type: String,
    pub event_data: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Filters for browsing the audit log. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<i32>,
    pub event_type: Option<String>,
    pub success: Option<bool>,
    pub ip_address: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

pub struct AuditRepository {
    conn: DatabaseConnection,
}

impl AuditRepository {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn add(&self, record: NewAuditRecord) -> Result<()> {
        let active_model = audit_logs::ActiveModel {
            user_id: Set(record.user_id),
            event_type: Set(record.event_type),
            event_data: Set(record.event_data),
            ip_address: Set(record.ip_address),
            user_agent: Set(record.user_agent),
            success: Set(record.success),
            created_at: Set(record.created_at),
            ..Default::default()
        };

        AuditLogs::insert(active_model)
            .exec(&self.conn)
            .await
            .context("Failed to append audit record")?;
        Ok(())
    }

    fn filtered(filter: &AuditFilter) -> Select<AuditLogs> {
        let mut query = AuditLogs::find().order_by_desc(audit_logs::Column::CreatedAt);

        if let Some(user_id) = filter.user_id {
            query = query.filter(audit_logs::Column::UserId.eq(user_id));
        }

        if let Some(event_type) = &filter.event_type {
            query = query.filter(audit_logs::Column::EventType.eq(event_type.as_str()));
        }

        if let Some(success) = filter.success {
            query = query.filter(audit_logs::Column::Success.eq(success));
        }

        if let Some(ip) = &filter.ip_address {
            query = query.filter(audit_logs::Column::IpAddress.eq(ip.as_str()));
        }

        if let Some(since) = filter.since {
            query = query.filter(audit_logs::Column::CreatedAt.gte(since));
        }

        if let Some(until) = filter.until {
            query = query.filter(audit_logs::Column::CreatedAt.lte(until));
        }

        query
    }

    /// Returns one page (1-based) plus total item and page counts.
    pub async fn get_logs(
        &self,
        filter: &AuditFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<audit_logs::Model>, u64, u64)> {
        let paginator = Self::filtered(filter).paginate(&self.conn, page_size.max(1));
        let totals = paginator.num_items_and_pages().await?;
        let items = paginator.fetch_page(page.max(1) - 1).await?;

        Ok((items, totals.number_of_items, totals.number_of_pages))
    }

    pub async fn get_all(&self, filter: &AuditFilter, limit: u64) -> Result<Vec<audit_logs::Model>> {
        let items = Self::filtered(filter)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Failed to query audit logs")?;
        Ok(items)
    }

    pub async fn count(&self, filter: &AuditFilter) -> Result<u64> {
        Self::filtered(filter)
            .count(&self.conn)
            .await
            .context("Failed to count audit logs")
    }

    pub async fn distinct_ips_for_user(
        &self,
        user_id: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ips = AuditLogs::find()
            .select_only()
            .column(audit_logs::Column::IpAddress)
            .distinct()
            .filter(audit_logs::Column::UserId.eq(user_id))
            .filter(audit_logs::Column::CreatedAt.gte(since))
            .filter(audit_logs::Column::IpAddress.is_not_null())
            .into_tuple::<String>()
            .all(&self.conn)
            .await
            .context("Failed to query distinct IPs")?;

        Ok(ips)
    }

    pub async fn latest(
        &self,
        user_id: i32,
        event_type: &str,
        success: bool,
    ) -> Result<Option<audit_logs::Model>> {
        AuditLogs::find()
            .filter(audit_logs::Column::UserId.eq(user_id))
            .filter(audit_logs::Column::EventType.eq(event_type))
            .filter(audit_logs::Column::Success.eq(success))
            .order_by_desc(audit_logs::Column::CreatedAt)
            .one(&self.conn)
            .await
            .context("Failed to query latest audit record")
    }

    /// IPs with at least `threshold` failed `event_type` records since `since`,
    /// busiest first.
    pub async fn ips_with_failures(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
        threshold: i64,
    ) -> Result<Vec<(String, i64)>> {
        let rows = AuditLogs::find()
            .select_only()
            .column(audit_logs::Column::IpAddress)
            .column_as(audit_logs::Column::Id.count(), "attempts")
            .filter(audit_logs::Column::EventType.eq(event_type))
            .filter(audit_logs::Column::Success.eq(false))
            .filter(audit_logs::Column::CreatedAt.gte(since))
            .filter(audit_logs::Column::IpAddress.is_not_null())
            .group_by(audit_logs::Column::IpAddress)
            .having(Expr::expr(audit_logs::Column::Id.count()).gte(threshold))
            .order_by_desc(audit_logs::Column::Id.count())
            .into_tuple::<(String, i64)>()
            .all(&self.conn)
            .await
            .context("Failed to query suspicious IPs")?;

        Ok(rows)
    }

    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = AuditLogs::delete_many()
            .filter(audit_logs::Column::CreatedAt.lt(cutoff))
            .exec(&self.conn)
            .await
            .context("Failed to prune audit logs")?;

        Ok(result.rows_affected)
    }
}
