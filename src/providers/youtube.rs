//! YouTube Data API client
//!
//! Google authorization-code flow with offline refresh, channel identity lookup,
//! and the search/videos reads that back the video cache.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{OAuthClient, Provider, ProviderError, TokenGrant, build_http_client, send, send_json};

pub const YOUTUBE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";

/// Static settings for [`YoutubeClient`].
#[derive(Clone)]
pub struct YoutubeSettings {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_base: String,
    pub api_base: String,
    pub timeout: Duration,
}

/// Channel descriptor stored as the integration identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelIdentity {
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Basic fields of a video as returned by search.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct VideoSummary {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct VideoPage {
    pub videos: Vec<VideoSummary>,
    pub next_page_token: Option<String>,
}

/// Full detail of a single video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetails {
    pub summary: VideoSummary,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub duration: Option<String>,
    pub privacy_status: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

impl Snippet {
    fn best_thumbnail(&self) -> Option<String> {
        let thumbnails = self.thumbnails.as_ref()?;
        [&thumbnails.high, &thumbnails.medium, &thumbnails.default]
            .into_iter()
            .flatten()
            .map(|t| t.url.clone())
            .next()
    }

    fn into_summary(self, video_id: String) -> VideoSummary {
        let thumbnail_url = self.best_thumbnail();
        VideoSummary {
            video_id,
            title: self.title.unwrap_or_default(),
            description: self.description.filter(|d| !d.is_empty()),
            thumbnail_url,
            published_at: self.published_at,
        }
    }
}

#[derive(Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    statistics: Statistics,
    #[serde(default, rename = "contentDetails")]
    content_details: ContentDetails,
    #[serde(default)]
    status: VideoStatus,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContentDetails {
    duration: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct VideoStatus {
    privacy_status: Option<String>,
}

/// Parses a statistics counter. YouTube sends counts as strings; anything
/// unparseable (or hidden) counts as zero.
pub fn parse_count(raw: Option<&str>) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|count| *count >= 0)
        .unwrap_or(0)
}

/// HTTP client for Google OAuth and the YouTube Data API v3.
pub struct YoutubeClient {
    settings: YoutubeSettings,
    http: Client,
}

impl YoutubeClient {
    pub fn new(settings: YoutubeSettings) -> reqwest::Result<Self> {
        Ok(Self {
            http: build_http_client(settings.timeout)?,
            settings,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.client_id.is_empty() && !self.settings.client_secret.is_empty()
    }

    fn token_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.token_base.trim_end_matches('/'), path)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    /// Builds the Google consent URL requesting offline access.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.settings.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", YOUTUBE_READONLY_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true")
            .append_pair("state", state);
        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        send_json(
            Provider::Youtube,
            self.http
                .post(self.token_url("/token"))
                .header("Accept", "application/json")
                .form(&params),
        )
        .await
    }

    /// Returns the caller's channel, or `None` when the account has no channel.
    pub async fn my_channel(
        &self,
        access_token: &str,
    ) -> Result<Option<ChannelIdentity>, ProviderError> {
        let response: ListResponse<ChannelItem> = send_json(
            Provider::Youtube,
            self.http
                .get(self.api_url("/channels"))
                .query(&[("part", "snippet"), ("mine", "true")])
                .bearer_auth(access_token),
        )
        .await?;

        Ok(response.items.into_iter().next().map(|item| {
            let thumbnail_url = item.snippet.best_thumbnail();
            ChannelIdentity {
                channel_id: item.id,
                title: item.snippet.title.unwrap_or_default(),
                description: item.snippet.description.filter(|d| !d.is_empty()),
                thumbnail_url,
            }
        }))
    }

    pub async fn list_my_videos(
        &self,
        access_token: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<VideoPage, ProviderError> {
        let max_results = max_results.to_string();
        let mut query = vec![
            ("part", "snippet"),
            ("forMine", "true"),
            ("type", "video"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: ListResponse<SearchItem> = send_json(
            Provider::Youtube,
            self.http
                .get(self.api_url("/search"))
                .query(&query)
                .bearer_auth(access_token),
        )
        .await?;

        let videos = response
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                Some(item.snippet.into_summary(video_id))
            })
            .collect();

        Ok(VideoPage {
            videos,
            next_page_token: response.next_page_token,
        })
    }

    /// Fetches one video with statistics; `None` when YouTube returns no items.
    pub async fn video_details(
        &self,
        access_token: &str,
        video_id: &str,
    ) -> Result<Option<VideoDetails>, ProviderError> {
        let response: ListResponse<VideoItem> = send_json(
            Provider::Youtube,
            self.http
                .get(self.api_url("/videos"))
                .query(&[
                    ("part", "snippet,statistics,contentDetails,status"),
                    ("id", video_id),
                ])
                .bearer_auth(access_token),
        )
        .await?;

        Ok(response.items.into_iter().next().map(|item| VideoDetails {
            view_count: parse_count(item.statistics.view_count.as_deref()),
            like_count: parse_count(item.statistics.like_count.as_deref()),
            comment_count: parse_count(item.statistics.comment_count.as_deref()),
            duration: item.content_details.duration,
            privacy_status: item.status.privacy_status,
            summary: item.snippet.into_summary(item.id),
        }))
    }
}

#[async_trait]
impl OAuthClient for YoutubeClient {
    fn provider(&self) -> Provider {
        Provider::Youtube
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        send_json(
            Provider::Youtube,
            self.http
                .post(self.token_url("/token"))
                .header("Accept", "application/json")
                .form(&params),
        )
        .await
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
        send(
            Provider::Youtube,
            self.http
                .post(self.token_url("/revoke"))
                .form(&[("token", token)]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> YoutubeClient {
        YoutubeClient::new(YoutubeSettings {
            client_id: "yt-id".to_string(),
            client_secret: "yt-secret".to_string(),
            auth_url: format!("{}/o/oauth2/v2/auth", server.uri()),
            token_base: server.uri(),
            api_base: server.uri(),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(Some("1234")), 1234);
        assert_eq!(parse_count(Some(" 42 ")), 42);
        assert_eq!(parse_count(Some("abc")), 0);
        assert_eq!(parse_count(Some("")), 0);
        assert_eq!(parse_count(Some("-5")), 0);
        assert_eq!(parse_count(None), 0);
    }

    #[tokio::test]
    async fn test_authorize_url_requests_offline_access() {
        let server = MockServer::start().await;
        let url = client_for(&server)
            .authorize_url("https://app.test/oauth/youtube/callback", "state-1")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["scope"], YOUTUBE_READONLY_SCOPE);
        assert_eq!(pairs["state"], "state-1");
    }

    #[tokio::test]
    async fn test_my_channel_empty_items_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .and(query_param("mine", "true"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})),
            )
            .mount(&server)
            .await;

        let channel = client_for(&server).my_channel("at").await.unwrap();
        assert!(channel.is_none());
    }

    #[tokio::test]
    async fn test_video_details_coerces_malformed_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("id", "vid1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "vid1",
                    "snippet": {
                        "title": "Launch",
                        "publishedAt": "2026-01-02T03:04:05Z",
                        "thumbnails": {"default": {"url": "https://img/d.jpg"}}
                    },
                    "statistics": {"viewCount": "abc", "likeCount": "7"},
                    "contentDetails": {"duration": "PT4M13S"},
                    "status": {"privacyStatus": "public"}
                }]
            })))
            .mount(&server)
            .await;

        let details = client_for(&server)
            .video_details("at", "vid1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(details.view_count, 0);
        assert_eq!(details.like_count, 7);
        assert_eq!(details.comment_count, 0);
        assert_eq!(details.duration.as_deref(), Some("PT4M13S"));
        assert_eq!(details.summary.title, "Launch");
        assert_eq!(
            details.summary.thumbnail_url.as_deref(),
            Some("https://img/d.jpg")
        );
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-at",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let grant = client_for(&server).refresh("rt").await.unwrap();
        assert_eq!(grant.access_token, "new-at");
        assert!(grant.refresh_token.is_none());
    }
}
