use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::entities::{audit_logs, sessions};

pub mod migrator;
pub mod repositories;

pub use repositories::audit::{AuditFilter, NewAuditRecord};
pub use repositories::user::{LockoutState, User};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn session_repo(&self) -> repositories::session::SessionRepository {
        repositories::session::SessionRepository::new(self.conn.clone())
    }

    fn audit_repo(&self) -> repositories::audit::AuditRepository {
        repositories::audit::AuditRepository::new(self.conn.clone())
    }

    fn reset_token_repo(&self) -> repositories::reset_token::ResetTokenRepository {
        repositories::reset_token::ResetTokenRepository::new(self.conn.clone())
    }

    // Users

    pub async fn create_user(
        &self,
        email: &str,
        password_hash: Option<String>,
        is_admin: bool,
        now: DateTime<Utc>,
    ) -> Result<User> {
        self.user_repo()
            .create(email, password_hash, is_admin, now)
            .await
    }

    pub async fn get_user(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn get_user_credentials(&self, email: &str) -> Result<Option<(User, Option<String>)>> {
        self.user_repo().get_credentials(email).await
    }

    pub async fn get_user_password_hash(&self, id: i32) -> Result<Option<String>> {
        self.user_repo().get_password_hash(id).await
    }

    pub async fn update_user_password_hash(
        &self,
        id: i32,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.user_repo()
            .update_password_hash(id, password_hash, now)
            .await
    }

    pub async fn set_user_admin(&self, id: i32, is_admin: bool, now: DateTime<Utc>) -> Result<()> {
        self.user_repo().set_admin(id, is_admin, now).await
    }

    pub async fn get_lockout_state(&self, user_id: i32) -> Result<Option<LockoutState>> {
        self.user_repo().lockout_state(user_id).await
    }

    pub async fn increment_failed_attempts(&self, user_id: i32, now: DateTime<Utc>) -> Result<bool> {
        self.user_repo()
            .increment_failed_attempts(user_id, now)
            .await
    }

    pub async fn lock_user_if_threshold_reached(
        &self,
        user_id: i32,
        threshold: i32,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.user_repo()
            .lock_if_threshold_reached(user_id, threshold, until, now)
            .await
    }

    pub async fn clear_expired_lock(&self, user_id: i32, now: DateTime<Utc>) -> Result<bool> {
        self.user_repo().clear_expired_lock(user_id, now).await
    }

    pub async fn reset_failed_attempts(&self, user_id: i32, now: DateTime<Utc>) -> Result<()> {
        self.user_repo().reset_failed_attempts(user_id, now).await
    }

    // Sessions

    pub async fn insert_session(&self, session: sessions::ActiveModel) -> Result<sessions::Model> {
        self.session_repo().insert(session).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<sessions::Model>> {
        self.session_repo().get(id).await
    }

    pub async fn get_session_for_user(
        &self,
        id: &str,
        user_id: i32,
    ) -> Result<Option<sessions::Model>> {
        self.session_repo().get_for_user(id, user_id).await
    }

    pub async fn get_rotation_count(&self, id: &str) -> Result<Option<i32>> {
        self.session_repo().rotation_count(id).await
    }

    pub async fn touch_session(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.session_repo().touch(id, now).await
    }

    pub async fn first_child_created_at(&self, parent_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.session_repo().first_child_created_at(parent_id).await
    }

    pub async fn insert_child_revoking_parent(
        &self,
        child: sessions::ActiveModel,
        parent_id: &str,
    ) -> Result<Option<sessions::Model>> {
        self.session_repo()
            .insert_child_revoking_parent(child, parent_id)
            .await
    }

    pub async fn revoke_session(&self, id: &str) -> Result<bool> {
        self.session_repo().revoke(id).await
    }

    pub async fn revoke_user_session(&self, id: &str, user_id: i32) -> Result<bool> {
        self.session_repo().revoke_for_user(id, user_id).await
    }

    pub async fn revoke_token_family(&self, token_family: &str) -> Result<Vec<sessions::Model>> {
        self.session_repo().revoke_family(token_family).await
    }

    pub async fn revoke_all_user_sessions(&self, user_id: i32) -> Result<Vec<sessions::Model>> {
        self.session_repo().revoke_all_for_user(user_id).await
    }

    pub async fn revoke_user_sessions_except(
        &self,
        user_id: i32,
        keep_session_id: &str,
    ) -> Result<Vec<sessions::Model>> {
        self.session_repo()
            .revoke_all_except(user_id, keep_session_id)
            .await
    }

    pub async fn get_token_family(&self, token_family: &str) -> Result<Vec<sessions::Model>> {
        self.session_repo().family(token_family).await
    }

    pub async fn list_active_sessions(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<sessions::Model>> {
        self.session_repo().list_active(user_id, now).await
    }

    pub async fn count_sessions_since(&self, user_id: i32, since: DateTime<Utc>) -> Result<u64> {
        self.session_repo()
            .count_created_since(user_id, since)
            .await
    }

    pub async fn delete_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.session_repo().delete_stale(cutoff).await
    }

    pub async fn clear_orphaned_session_parents(&self) -> Result<u64> {
        self.session_repo().clear_orphaned_parents().await
    }

    // Audit log

    pub async fn add_audit_record(&self, record: NewAuditRecord) -> Result<()> {
        self.audit_repo().add(record).await
    }

    pub async fn get_audit_logs(
        &self,
        filter: &AuditFilter,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<audit_logs::Model>, u64, u64)> {
        self.audit_repo().get_logs(filter, page, page_size).await
    }

    pub async fn get_all_audit_logs(
        &self,
        filter: &AuditFilter,
        limit: u64,
    ) -> Result<Vec<audit_logs::Model>> {
        self.audit_repo().get_all(filter, limit).await
    }

    pub async fn count_audit_logs(&self, filter: &AuditFilter) -> Result<u64> {
        self.audit_repo().count(filter).await
    }

    pub async fn distinct_audit_ips(&self, user_id: i32, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.audit_repo().distinct_ips_for_user(user_id, since).await
    }

    pub async fn latest_audit_record(
        &self,
        user_id: i32,
        event_type: &str,
        success: bool,
    ) -> Result<Option<audit_logs::Model>> {
        self.audit_repo()
            .latest(user_id, event_type, success)
            .await
    }

    pub async fn ips_with_failures(
        &self,
        event_type: &str,
        since: DateTime<Utc>,
        threshold: i64,
    ) -> Result<Vec<(String, i64)>> {
        self.audit_repo()
            .ips_with_failures(event_type, since, threshold)
            .await
    }

    pub async fn prune_audit_logs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.audit_repo().prune(cutoff).await
    }

    // Password reset tokens

    pub async fn replace_reset_token(
        &self,
        user_id: i32,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.reset_token_repo()
            .replace_for_user(user_id, token_hash, expires_at, now)
            .await
    }

    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>> {
        self.reset_token_repo().consume(token_hash, now).await
    }

    pub async fn prune_reset_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.reset_token_repo().prune(cutoff).await
    }
}
