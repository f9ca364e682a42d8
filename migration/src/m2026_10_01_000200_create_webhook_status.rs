//! Migration to create the webhook_status table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookStatus::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WebhookStatus::Provider).text().not_null())
                    .col(ColumnDef::new(WebhookStatus::UserId).uuid().null())
                    .col(
                        ColumnDef::new(WebhookStatus::IsActive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(WebhookStatus::WebhookId).text().null())
                    .col(ColumnDef::new(WebhookStatus::LastError).text().null())
                    .col(
                        ColumnDef::new(WebhookStatus::LastCheckedAt)
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
                    .name("idx_webhook_status_provider_user")
                    .table(WebhookStatus::Table)
                    .col(WebhookStatus::Provider)
                    .col(WebhookStatus::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhook_status_provider_user")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WebhookStatus::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookStatus {
    Table,
    Id,
    Provider,
    UserId,
    IsActive,
    WebhookId,
    LastError,
    LastCheckedAt,
}
