//! # Video Read-Through Cache
//!
//! Serves YouTube video details from `youtube_videos` when every detailed field is present
//! and fetches them otherwise. Listing always goes to YouTube and refreshes the basic
//! columns only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::IntegrationError;
use crate::models::youtube_video;
use crate::providers::Provider;
use crate::providers::youtube::{VideoSummary, YoutubeClient};
use crate::repositories::{IntegrationRepository, VideoCacheRepository};
use crate::token_manager::TokenManager;

pub const MAX_PAGE_SIZE: u32 = 50;

/// A cached or freshly fetched video.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub duration: Option<String>,
    pub privacy_status: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl From<youtube_video::Model> for VideoRecord {
    fn from(model: youtube_video::Model) -> Self {
        Self {
            video_id: model.video_id,
            title: model.title,
            description: model.description,
            thumbnail_url: model.thumbnail_url,
            published_at: model.published_at.map(|d| d.with_timezone(&Utc)),
            view_count: model.view_count,
            like_count: model.like_count,
            comment_count: model.comment_count,
            duration: model.duration,
            privacy_status: model.privacy_status,
            fetched_at: model.fetched_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VideoDetailResponse {
    pub video: VideoRecord,
    /// `true` when served without calling YouTube
    pub cached: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VideoListResponse {
    pub videos: Vec<VideoSummary>,
    pub next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct VideoCacheService {
    youtube: Arc<YoutubeClient>,
    tokens: TokenManager,
    integrations: IntegrationRepository,
    cache: VideoCacheRepository,
}

impl VideoCacheService {
    pub fn new(
        youtube: Arc<YoutubeClient>,
        tokens: TokenManager,
        integrations: IntegrationRepository,
        cache: VideoCacheRepository,
    ) -> Self {
        Self {
            youtube,
            tokens,
            integrations,
            cache,
        }
    }

    async fn ensure_connected(&self, user_id: Uuid) -> Result<(), IntegrationError> {
        self.integrations
            .find_connected(user_id, Provider::Youtube)
            .await?
            .map(|_| ())
            .ok_or(IntegrationError::NotConnected {
                provider: Provider::Youtube,
            })
    }

    /// Returns the video's details, calling YouTube only when the cached row is incomplete.
    #[instrument(skip(self))]
    pub async fn get_video_detail(
        &self,
        user_id: Uuid,
        video_id: &str,
    ) -> Result<VideoDetailResponse, IntegrationError> {
        self.ensure_connected(user_id).await?;

        if let Some(row) = self.cache.find(user_id, video_id).await?
            && row.is_complete()
        {
            counter!("video_cache_requests_total", "result" => "hit").increment(1);
            debug!("Video served from cache");
            return Ok(VideoDetailResponse {
                video: row.into(),
                cached: true,
            });
        }
        counter!("video_cache_requests_total", "result" => "miss").increment(1);

        let client = self.youtube.clone();
        let id = video_id.to_string();
        let details = self
            .tokens
            .call_with_token(user_id, move |token| {
                let client = client.clone();
                let id = id.clone();
                async move { client.video_details(&token, &id).await }
            })
            .await?
            .ok_or_else(|| IntegrationError::ResourceNotFound(format!("video {video_id}")))?;

        let row = self.cache.upsert_details(user_id, &details).await?;
        Ok(VideoDetailResponse {
            video: row.into(),
            cached: false,
        })
    }

    /// Lists the caller's uploads live and refreshes the basic cache columns.
    #[instrument(skip(self))]
    pub async fn list_videos(
        &self,
        user_id: Uuid,
        max_results: u32,
        page_token: Option<String>,
    ) -> Result<VideoListResponse, IntegrationError> {
        self.ensure_connected(user_id).await?;

        let client = self.youtube.clone();
        let max_results = max_results.clamp(1, MAX_PAGE_SIZE);
        let page = self
            .tokens
            .call_with_token(user_id, move |token| {
                let client = client.clone();
                let page_token = page_token.clone();
                async move {
                    client
                        .list_my_videos(&token, max_results, page_token.as_deref())
                        .await
                }
            })
            .await?;

        for video in &page.videos {
            if let Err(error) = self.cache.upsert_basic(user_id, video).await {
                warn!(video_id = %video.video_id, error = %error, "Failed to cache listed video");
            }
        }

        Ok(VideoListResponse {
            videos: page.videos,
            next_page_token: page.next_page_token,
        })
    }
}
