//! Outbound provider clients.
//!
//! Each supported provider gets a thin HTTP client that speaks its OAuth and
//! resource APIs. Failures are normalized into [`ProviderError`] so callers can
//! branch on a closed [`ProviderErrorKind`] instead of inspecting raw bodies.

pub mod calendly;
pub mod youtube;

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use utoipa::ToSchema;

pub use calendly::CalendlyClient;
pub use youtube::YoutubeClient;

/// Upper bound on provider body text kept for diagnostics.
const MAX_ERROR_BODY_CHARS: usize = 1024;

/// Third-party providers an integration can be established with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Calendly,
    Youtube,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Calendly, Provider::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Calendly => "calendly",
            Provider::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "calendly" => Ok(Provider::Calendly),
            "youtube" => Ok(Provider::Youtube),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

/// Tokens returned by a provider token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Absolute expiry computed from `expires_in`, if the provider sent one.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .filter(|seconds| *seconds > 0)
            .map(|seconds| now + chrono::Duration::seconds(seconds))
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Closed classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The resource being created already exists.
    Conflict,
    NotFound,
    /// Timeouts, throttling and upstream 5xx.
    Transient,
    Unknown,
}

/// Error envelope shapes the providers use (`title`/`message` for Calendly,
/// `error`/`error_description` for Google).
#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ProviderErrorKind {
    /// Decodes a non-success status and body into a kind.
    pub fn classify(status: u16, body: &str) -> Self {
        let parsed: ProviderErrorBody = serde_json::from_str(body).unwrap_or_default();
        let already_exists = [parsed.title.as_deref(), parsed.message.as_deref()]
            .into_iter()
            .flatten()
            .chain(parsed.error.as_ref().and_then(|e| e.as_str()))
            .any(|text| text.to_ascii_lowercase().contains("already exists"));

        match status {
            409 => ProviderErrorKind::Conflict,
            400 | 422 if already_exists => ProviderErrorKind::Conflict,
            404 => ProviderErrorKind::NotFound,
            408 | 429 => ProviderErrorKind::Transient,
            s if s >= 500 => ProviderErrorKind::Transient,
            _ => ProviderErrorKind::Unknown,
        }
    }
}

/// Failure of an outbound provider call. Timeouts share the taxonomy with HTTP errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: Provider },
    #[error("{provider} request failed: {message}")]
    Transport { provider: Provider, message: String },
    #[error("{provider} returned HTTP {status}")]
    Http {
        provider: Provider,
        status: u16,
        kind: ProviderErrorKind,
        body: String,
    },
    #[error("{provider} returned an unexpected response: {message}")]
    MalformedResponse { provider: Provider, message: String },
}

impl ProviderError {
    pub fn from_reqwest(provider: Provider, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout { provider }
        } else {
            ProviderError::Transport {
                provider,
                // without_url keeps query strings (codes, tokens) out of logs
                message: error.without_url().to_string(),
            }
        }
    }

    /// Consumes a non-success response into an `Http` error.
    pub async fn from_response(provider: Provider, response: Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        ProviderError::Http {
            provider,
            status,
            kind: ProviderErrorKind::classify(status, &body),
            body,
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ProviderError::Timeout { provider }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Http { provider, .. }
            | ProviderError::MalformedResponse { provider, .. } => *provider,
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } | ProviderError::Transport { .. } => {
                ProviderErrorKind::Transient
            }
            ProviderError::Http { kind, .. } => *kind,
            ProviderError::MalformedResponse { .. } => ProviderErrorKind::Unknown,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ProviderError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

/// OAuth operations shared by every provider.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Exchanges a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Revokes an access or refresh token at the provider.
    async fn revoke(&self, token: &str) -> Result<(), ProviderError>;
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("linktrail/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Sends a request, returning the response only when it is a 2xx.
pub(crate) async fn send(
    provider: Provider,
    request: reqwest::RequestBuilder,
) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e))?;

    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ProviderError::from_response(provider, response).await)
    }
}

/// Sends a request and decodes a JSON success body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: Provider,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = send(provider, request).await?;
    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout { provider }
        } else {
            ProviderError::MalformedResponse {
                provider,
                message: e.without_url().to_string(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!("calendly".parse::<Provider>().unwrap(), Provider::Calendly);
        assert_eq!("YouTube".parse::<Provider>().unwrap(), Provider::Youtube);
        assert!("zoom".parse::<Provider>().is_err());
        assert_eq!(Provider::Youtube.to_string(), "youtube");
    }

    #[test]
    fn test_classify_calendly_already_exists() {
        let body = r#"{"title":"Already Exists","message":"Hook with this url already exists"}"#;
        assert_eq!(
            ProviderErrorKind::classify(409, body),
            ProviderErrorKind::Conflict
        );
        assert_eq!(
            ProviderErrorKind::classify(400, body),
            ProviderErrorKind::Conflict
        );
    }

    #[test]
    fn test_classify_other_statuses() {
        assert_eq!(
            ProviderErrorKind::classify(404, ""),
            ProviderErrorKind::NotFound
        );
        assert_eq!(
            ProviderErrorKind::classify(429, "slow down"),
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderErrorKind::classify(503, "<html>"),
            ProviderErrorKind::Transient
        );
        assert_eq!(
            ProviderErrorKind::classify(400, r#"{"title":"Invalid Argument"}"#),
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn test_token_grant_debug_is_redacted() {
        let grant = TokenGrant {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: Some(3600),
        };
        let rendered = format!("{grant:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }

    #[test]
    fn test_token_grant_expiry() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        };
        assert_eq!(grant.expires_at(now), Some(now + chrono::Duration::hours(1)));

        let no_expiry = TokenGrant {
            expires_in: None,
            ..grant
        };
        assert_eq!(no_expiry.expires_at(now), None);
    }
}
