//! # Video Handlers

use std::sync::LazyLock;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use regex::Regex;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, IntegrationError};
use crate::handlers::parse_provider;
use crate::providers::Provider;
use crate::server::AppState;
use crate::video_cache::{MAX_PAGE_SIZE, VideoDetailResponse, VideoListResponse};

const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListVideosQuery {
    /// Page size, 1-50 (default 25)
    pub max_results: Option<u32>,
    /// Continuation token from a previous page
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VideoDetailsQuery {
    /// YouTube video id
    pub id: Option<String>,
}

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid video id regex"));

fn is_valid_video_id(id: &str) -> bool {
    VIDEO_ID.is_match(id)
}

/// List the caller's uploads
///
/// Always fetched live; the basic columns of each listed video are written to the cache.
#[utoipa::path(
    get,
    path = "/user/{provider}/videos",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Only youtube is supported"),
        ListVideosQuery
    ),
    responses(
        (status = 200, description = "A page of videos", body = VideoListResponse),
        (status = 400, description = "Unsupported provider, bad page size or not connected", body = ApiError),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 502, description = "YouTube request failed", body = ApiError)
    ),
    tag = "videos"
)]
pub async fn list_videos(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(provider): Path<String>,
    Query(query): Query<ListVideosQuery>,
) -> Result<Json<VideoListResponse>, ApiError> {
    let provider = parse_provider(&provider)?;
    if provider != Provider::Youtube {
        return Err(IntegrationError::UnsupportedProvider(provider.to_string()).into());
    }

    let max_results = query.max_results.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&max_results) {
        return Err(IntegrationError::InvalidRequest(format!(
            "max_results must be between 1 and {MAX_PAGE_SIZE}"
        ))
        .into());
    }

    let page_token = query.page_token.filter(|t| !t.is_empty());
    let page = state
        .videos
        .list_videos(user_id, max_results, page_token)
        .await?;
    Ok(Json(page))
}

/// Video details, served from the cache when complete
#[utoipa::path(
    get,
    path = "/video-details",
    security(("bearer_auth" = [])),
    params(VideoDetailsQuery),
    responses(
        (status = 200, description = "Video details", body = VideoDetailResponse),
        (status = 400, description = "Missing or malformed id, or YouTube not connected", body = ApiError),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 404, description = "Video not found", body = ApiError),
        (status = 502, description = "YouTube request failed", body = ApiError)
    ),
    tag = "videos"
)]
pub async fn video_details(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<VideoDetailsQuery>,
) -> Result<Json<VideoDetailResponse>, ApiError> {
    let id = query.id.ok_or(IntegrationError::MissingParameter("id"))?;
    if !is_valid_video_id(&id) {
        return Err(IntegrationError::InvalidRequest("id is not a valid video id".to_string()).into());
    }

    let detail = state.videos.get_video_detail(user_id, &id).await?;
    Ok(Json(detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_id_validation() {
        assert!(is_valid_video_id("dQw4w9WgXcQ"));
        assert!(is_valid_video_id("a-b_c"));
        assert!(!is_valid_video_id(""));
        assert!(!is_valid_video_id("../etc/passwd"));
        assert!(!is_valid_video_id("id with spaces"));
        assert!(!is_valid_video_id(&"x".repeat(65)));
    }
}
