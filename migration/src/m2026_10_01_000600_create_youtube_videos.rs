//! Migration to create the youtube_videos cache table.
//!
//! Basic fields are written by every listing; the detailed statistics columns
//! stay NULL until a detail fetch populates them.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(YoutubeVideos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(YoutubeVideos::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(YoutubeVideos::UserId).uuid().not_null())
                    .col(ColumnDef::new(YoutubeVideos::VideoId).text().not_null())
                    .col(ColumnDef::new(YoutubeVideos::Title).text().not_null())
                    .col(ColumnDef::new(YoutubeVideos::Description).text().null())
                    .col(ColumnDef::new(YoutubeVideos::ThumbnailUrl).text().null())
                    .col(
                        ColumnDef::new(YoutubeVideos::PublishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(YoutubeVideos::ViewCount).big_integer().null())
                    .col(ColumnDef::new(YoutubeVideos::LikeCount).big_integer().null())
                    .col(
                        ColumnDef::new(YoutubeVideos::CommentCount)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(YoutubeVideos::Duration).text().null())
                    .col(ColumnDef::new(YoutubeVideos::PrivacyStatus).text().null())
                    .col(
                        ColumnDef::new(YoutubeVideos::FetchedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(YoutubeVideos::UpdatedAt)
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
                    .name("idx_youtube_videos_user_video")
                    .table(YoutubeVideos::Table)
                    .col(YoutubeVideos::UserId)
                    .col(YoutubeVideos::VideoId)
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
                    .name("idx_youtube_videos_user_video")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(YoutubeVideos::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum YoutubeVideos {
    Table,
    Id,
    UserId,
    VideoId,
    Title,
    Description,
    ThumbnailUrl,
    PublishedAt,
    ViewCount,
    LikeCount,
    CommentCount,
    Duration,
    PrivacyStatus,
    FetchedAt,
    UpdatedAt,
}
