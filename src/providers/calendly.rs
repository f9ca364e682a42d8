//! Calendly API client
//!
//! Covers the PKCE authorization-code grant, the `users/me` identity lookup and
//! user-scoped webhook subscription CRUD.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{OAuthClient, Provider, ProviderError, TokenGrant, build_http_client, send, send_json};

/// Events every linktrail subscription listens for.
pub const WEBHOOK_EVENTS: &[&str] = &["invitee.created", "invitee.canceled"];

const LIST_PAGE_SIZE: u32 = 100;
const MAX_LIST_PAGES: usize = 20;

/// Static settings for [`CalendlyClient`].
#[derive(Clone)]
pub struct CalendlySettings {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_signing_key: Option<String>,
    pub auth_base: String,
    pub api_base: String,
    pub token_timeout: Duration,
    pub webhook_timeout: Duration,
}

/// Identity returned by `GET /users/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendlyIdentity {
    pub user_uri: String,
    pub organization_uri: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// A webhook subscription as listed by Calendly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, utoipa::ToSchema)]
pub struct WebhookSubscription {
    pub uri: String,
    pub callback_url: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Deserialize)]
struct UserEnvelope {
    resource: UserResource,
}

#[derive(Deserialize)]
struct UserResource {
    uri: String,
    current_organization: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionEnvelope {
    resource: WebhookSubscription,
}

#[derive(Deserialize)]
struct SubscriptionPage {
    #[serde(default)]
    collection: Vec<WebhookSubscription>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Serialize)]
struct CreateSubscriptionRequest<'a> {
    url: &'a str,
    events: &'a [&'a str],
    organization: &'a str,
    user: &'a str,
    scope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signing_key: Option<&'a str>,
}

/// HTTP client for Calendly's OAuth and v2 REST APIs.
pub struct CalendlyClient {
    settings: CalendlySettings,
    token_http: Client,
    webhook_http: Client,
}

impl CalendlyClient {
    pub fn new(settings: CalendlySettings) -> reqwest::Result<Self> {
        Ok(Self {
            token_http: build_http_client(settings.token_timeout)?,
            webhook_http: build_http_client(settings.webhook_timeout)?,
            settings,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.settings.client_id.is_empty() && !self.settings.client_secret.is_empty()
    }

    pub fn webhook_signing_key(&self) -> Option<&str> {
        self.settings.webhook_signing_key.as_deref()
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.auth_base.trim_end_matches('/'), path)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    /// Builds the browser authorization URL for the S256 PKCE flow.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.auth_url("/oauth/authorize"))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", code_challenge);
        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        send_json(
            Provider::Calendly,
            self.token_http
                .post(self.auth_url("/oauth/token"))
                .header("Accept", "application/json")
                .form(&params),
        )
        .await
    }

    pub async fn current_user(&self, access_token: &str) -> Result<CalendlyIdentity, ProviderError> {
        let envelope: UserEnvelope = send_json(
            Provider::Calendly,
            self.token_http
                .get(self.api_url("/users/me"))
                .bearer_auth(access_token),
        )
        .await?;

        Ok(CalendlyIdentity {
            user_uri: envelope.resource.uri,
            organization_uri: envelope.resource.current_organization,
            name: envelope.resource.name,
            email: envelope.resource.email,
        })
    }

    /// Creates a user-scoped subscription delivering to `callback_url`.
    pub async fn create_webhook_subscription(
        &self,
        access_token: &str,
        callback_url: &str,
        organization_uri: &str,
        user_uri: &str,
    ) -> Result<WebhookSubscription, ProviderError> {
        let body = CreateSubscriptionRequest {
            url: callback_url,
            events: WEBHOOK_EVENTS,
            organization: organization_uri,
            user: user_uri,
            scope: "user",
            signing_key: self.webhook_signing_key(),
        };

        let envelope: SubscriptionEnvelope = send_json(
            Provider::Calendly,
            self.webhook_http
                .post(self.api_url("/webhook_subscriptions"))
                .bearer_auth(access_token)
                .json(&body),
        )
        .await?;

        Ok(envelope.resource)
    }

    /// Lists every user-scoped subscription, following `pagination.next_page`.
    pub async fn list_webhook_subscriptions(
        &self,
        access_token: &str,
        organization_uri: &str,
        user_uri: &str,
    ) -> Result<Vec<WebhookSubscription>, ProviderError> {
        let mut subscriptions = Vec::new();
        let count = LIST_PAGE_SIZE.to_string();
        let mut request = self
            .webhook_http
            .get(self.api_url("/webhook_subscriptions"))
            .query(&[
                ("organization", organization_uri),
                ("user", user_uri),
                ("scope", "user"),
                ("count", count.as_str()),
            ]);

        for _ in 0..MAX_LIST_PAGES {
            let page: SubscriptionPage =
                send_json(Provider::Calendly, request.bearer_auth(access_token)).await?;
            subscriptions.extend(page.collection);

            match page.pagination.and_then(|p| p.next_page) {
                Some(next) if !next.is_empty() => {
                    request = self.webhook_http.get(self.resolve_api_uri(&next));
                }
                _ => return Ok(subscriptions),
            }
        }

        tracing::warn!(
            pages = MAX_LIST_PAGES,
            "Stopped following Calendly webhook pagination"
        );
        Ok(subscriptions)
    }

    pub async fn delete_webhook_subscription(
        &self,
        access_token: &str,
        subscription_uri: &str,
    ) -> Result<(), ProviderError> {
        send(
            Provider::Calendly,
            self.webhook_http
                .delete(self.resolve_api_uri(subscription_uri))
                .bearer_auth(access_token),
        )
        .await?;
        Ok(())
    }

    /// Calendly hands out absolute resource URIs. Anything outside the configured API base is
    /// re-rooted onto it so bearer tokens never leave for another host.
    fn resolve_api_uri(&self, uri: &str) -> String {
        let base = self.settings.api_base.trim_end_matches('/');
        if uri.starts_with(base) {
            return uri.to_string();
        }

        match Url::parse(uri) {
            Ok(parsed) => {
                let mut rebased = format!("{base}{}", parsed.path());
                if let Some(query) = parsed.query() {
                    rebased.push('?');
                    rebased.push_str(query);
                }
                rebased
            }
            Err(_) => format!("{base}/{}", uri.trim_start_matches('/')),
        }
    }
}

#[async_trait]
impl OAuthClient for CalendlyClient {
    fn provider(&self) -> Provider {
        Provider::Calendly
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        send_json(
            Provider::Calendly,
            self.token_http
                .post(self.auth_url("/oauth/token"))
                .header("Accept", "application/json")
                .form(&params),
        )
        .await
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("token", token),
        ];

        send(
            Provider::Calendly,
            self.token_http
                .post(self.auth_url("/oauth/revoke"))
                .form(&params),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CalendlyClient {
        CalendlyClient::new(CalendlySettings {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            webhook_signing_key: Some("signing".to_string()),
            auth_base: server.uri(),
            api_base: server.uri(),
            token_timeout: Duration::from_secs(2),
            webhook_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_authorize_url_carries_pkce_challenge() {
        let client = CalendlyClient::new(CalendlySettings {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            webhook_signing_key: None,
            auth_base: "https://auth.calendly.com".to_string(),
            api_base: "https://api.calendly.com".to_string(),
            token_timeout: Duration::from_secs(10),
            webhook_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let url = client
            .authorize_url("https://app.test/oauth/calendly/callback", "st", "chal")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(parsed.path(), "/oauth/authorize");
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], "chal");
        assert_eq!(pairs["state"], "st");
    }

    #[tokio::test]
    async fn test_exchange_code_sends_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("code_verifier=verifier-123"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": 7200,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client_for(&server)
            .exchange_code("code-1", "https://app.test/cb", "verifier-123")
            .await
            .unwrap();

        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        assert_eq!(grant.expires_in, Some(7200));
    }

    #[tokio::test]
    async fn test_current_user_maps_organization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resource": {
                    "uri": "https://api.calendly.com/users/U1",
                    "name": "Ada",
                    "email": "ada@example.com",
                    "current_organization": "https://api.calendly.com/organizations/O1"
                }
            })))
            .mount(&server)
            .await;

        let identity = client_for(&server).current_user("at").await.unwrap();
        assert_eq!(identity.user_uri, "https://api.calendly.com/users/U1");
        assert_eq!(
            identity.organization_uri,
            "https://api.calendly.com/organizations/O1"
        );
    }

    #[tokio::test]
    async fn test_list_follows_next_page() {
        let server = MockServer::start().await;
        let next = format!("{}/webhook_subscriptions?page_token=p2", server.uri());

        Mock::given(method("GET"))
            .and(path("/webhook_subscriptions"))
            .and(query_param("page_token", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collection": [{"uri": "u2", "callback_url": "https://b"}],
                "pagination": {"next_page": null}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/webhook_subscriptions"))
            .and(query_param("scope", "user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collection": [{"uri": "u1", "callback_url": "https://a"}],
                "pagination": {"next_page": next}
            })))
            .mount(&server)
            .await;

        let subs = client_for(&server)
            .list_webhook_subscriptions("at", "org", "user")
            .await
            .unwrap();

        let uris: Vec<_> = subs.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_create_conflict_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook_subscriptions"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "title": "Already Exists",
                "message": "Hook with this url already exists"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_webhook_subscription("at", "https://cb", "org", "user")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), super::super::ProviderErrorKind::Conflict);
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn test_foreign_uris_are_rebased() {
        let client = CalendlyClient::new(CalendlySettings {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_signing_key: None,
            auth_base: "https://auth.calendly.com".to_string(),
            api_base: "https://api.calendly.com".to_string(),
            token_timeout: Duration::from_secs(10),
            webhook_timeout: Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(
            client.resolve_api_uri("https://api.calendly.com/webhook_subscriptions/W1"),
            "https://api.calendly.com/webhook_subscriptions/W1"
        );
        assert_eq!(
            client.resolve_api_uri("https://evil.example/webhook_subscriptions/W1"),
            "https://api.calendly.com/webhook_subscriptions/W1"
        );
        assert!(!client.is_configured());
    }
}
