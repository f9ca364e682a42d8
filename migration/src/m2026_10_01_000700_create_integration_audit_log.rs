//! Migration to create the integration_audit_log table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IntegrationAuditLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationAuditLog::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(IntegrationAuditLog::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(IntegrationAuditLog::Provider)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IntegrationAuditLog::Action).text().not_null())
                    .col(
                        ColumnDef::new(IntegrationAuditLog::Detail)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationAuditLog::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_integration_audit_log_user")
                    .table(IntegrationAuditLog::Table)
                    .col(IntegrationAuditLog::UserId)
                    .col(IntegrationAuditLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_integration_audit_log_user")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(IntegrationAuditLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IntegrationAuditLog {
    Table,
    Id,
    UserId,
    Provider,
    Action,
    Detail,
    CreatedAt,
}
