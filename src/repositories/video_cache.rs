//! Video cache repository
//!
//! Upserts never overwrite a stored value with a missing one: listing writes only the
//! basic fields, detail writes everything the detail response actually carried.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::youtube_video::{self, Column, Entity as YoutubeVideo};
use crate::providers::youtube::{VideoDetails, VideoSummary};

#[derive(Clone)]
pub struct VideoCacheRepository {
    db: Arc<DatabaseConnection>,
}

impl VideoCacheRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, user_id: Uuid, video_id: &str) -> Result<Option<youtube_video::Model>> {
        Ok(YoutubeVideo::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::VideoId.eq(video_id))
            .one(&*self.db)
            .await?)
    }

    fn basic_row(user_id: Uuid, video: &VideoSummary, now: DateTimeWithTimeZone) -> youtube_video::ActiveModel {
        youtube_video::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            video_id: Set(video.video_id.clone()),
            title: Set(video.title.clone()),
            description: Set(video.description.clone()),
            thumbnail_url: Set(video.thumbnail_url.clone()),
            published_at: Set(video.published_at.map(Into::into)),
            view_count: Set(None),
            like_count: Set(None),
            comment_count: Set(None),
            duration: Set(None),
            privacy_status: Set(None),
            fetched_at: Set(now),
            updated_at: Set(now),
        }
    }

    fn summary_update_columns(video: &VideoSummary) -> Vec<Column> {
        let mut columns = vec![Column::Title, Column::UpdatedAt];
        if video.description.is_some() {
            columns.push(Column::Description);
        }
        if video.thumbnail_url.is_some() {
            columns.push(Column::ThumbnailUrl);
        }
        if video.published_at.is_some() {
            columns.push(Column::PublishedAt);
        }
        columns
    }

    /// Upserts the basic fields of a listed video, leaving detailed fields untouched.
    pub async fn upsert_basic(&self, user_id: Uuid, video: &VideoSummary) -> Result<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        YoutubeVideo::insert(Self::basic_row(user_id, video, now))
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::VideoId])
                    .update_columns(Self::summary_update_columns(video))
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    /// Upserts a detail fetch and returns the stored row.
    pub async fn upsert_details(
        &self,
        user_id: Uuid,
        details: &VideoDetails,
    ) -> Result<youtube_video::Model> {
        let now: DateTimeWithTimeZone = Utc::now().into();

        let mut row = Self::basic_row(user_id, &details.summary, now);
        row.view_count = Set(Some(details.view_count));
        row.like_count = Set(Some(details.like_count));
        row.comment_count = Set(Some(details.comment_count));
        row.duration = Set(details.duration.clone());
        row.privacy_status = Set(details.privacy_status.clone());

        let mut columns = Self::summary_update_columns(&details.summary);
        columns.extend([
            Column::ViewCount,
            Column::LikeCount,
            Column::CommentCount,
            Column::FetchedAt,
        ]);
        if details.duration.is_some() {
            columns.push(Column::Duration);
        }
        if details.privacy_status.is_some() {
            columns.push(Column::PrivacyStatus);
        }

        YoutubeVideo::insert(row)
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::VideoId])
                    .update_columns(columns)
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find(user_id, &details.summary.video_id)
            .await?
            .ok_or_else(|| anyhow!("video cache row not persisted"))
    }
}
