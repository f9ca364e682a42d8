//! Migration to create the integrations table.
//!
//! One row per (user, provider) OAuth connection. Tokens are stored as
//! AES-GCM ciphertext; the row survives disconnects with `is_connected = false`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Integrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Integrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Integrations::UserId).uuid().not_null())
                    .col(ColumnDef::new(Integrations::Provider).text().not_null())
                    .col(
                        ColumnDef::new(Integrations::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::IsConnected)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Integrations::ProviderIdentity)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(Integrations::ExternalUserId).text().null())
                    .col(ColumnDef::new(Integrations::ExternalOrgId).text().null())
                    .col(ColumnDef::new(Integrations::WebhookId).text().null())
                    .col(
                        ColumnDef::new(Integrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Integrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert conflict target
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_user_provider")
                    .table(Integrations::Table)
                    .col(Integrations::UserId)
                    .col(Integrations::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Webhook owner resolution looks integrations up by provider-side user URI
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_provider_external_user")
                    .table(Integrations::Table)
                    .col(Integrations::Provider)
                    .col(Integrations::ExternalUserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_integrations_provider_external_user")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_integrations_user_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Integrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
    UserId,
    Provider,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    TokenExpiresAt,
    IsConnected,
    ProviderIdentity,
    ExternalUserId,
    ExternalOrgId,
    WebhookId,
    CreatedAt,
    UpdatedAt,
}
