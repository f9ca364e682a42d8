//! Migration to create the calls table (attributed booking events).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Calls::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Calls::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Calls::UserId).uuid().not_null())
                    .col(ColumnDef::new(Calls::LinkId).uuid().not_null())
                    .col(ColumnDef::new(Calls::ShortCode).text().not_null())
                    .col(ColumnDef::new(Calls::ExternalEventId).text().not_null())
                    .col(ColumnDef::new(Calls::ContactEmail).text().null())
                    .col(ColumnDef::new(Calls::ContactName).text().null())
                    .col(
                        ColumnDef::new(Calls::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Calls::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Redelivered webhook events collapse onto the first insert
        manager
            .create_index(
                Index::create()
                    .name("idx_calls_user_external_event")
                    .table(Calls::Table)
                    .col(Calls::UserId)
                    .col(Calls::ExternalEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calls_user_short_code")
                    .table(Calls::Table)
                    .col(Calls::UserId)
                    .col(Calls::ShortCode)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_calls_user_short_code").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_calls_user_external_event")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Calls::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Calls {
    Table,
    Id,
    UserId,
    LinkId,
    ShortCode,
    ExternalEventId,
    ContactEmail,
    ContactName,
    OccurredAt,
    CreatedAt,
}
