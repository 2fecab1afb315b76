use crate::entities::prelude::*;
use crate::entities::{audit_logs, sessions};
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        // Order matters: sessions and reset tokens reference users.
        manager
            .create_table(
                schema
                    .create_table_from_entity(Users)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Sessions)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AuditLogs)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(PasswordResetTokens)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Active-session listing per user
        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_user_revoked_active")
                    .table(Sessions)
                    .col(sessions::Column::UserId)
                    .col(sessions::Column::Revoked)
                    .col(sessions::Column::LastActiveAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Child lookup for reuse detection
        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_parent")
                    .table(Sessions)
                    .col(sessions::Column::ParentSessionId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_family")
                    .table(Sessions)
                    .col(sessions::Column::TokenFamily)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_audit_logs_user_id", audit_logs::Column::UserId),
            ("idx_audit_logs_event_type", audit_logs::Column::EventType),
            ("idx_audit_logs_created_at", audit_logs::Column::CreatedAt),
            ("idx_audit_logs_ip_address", audit_logs::Column::IpAddress),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(AuditLogs)
                        .col(column)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PasswordResetTokens).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuditLogs).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users).to_owned())
            .await?;

        Ok(())
    }
}
