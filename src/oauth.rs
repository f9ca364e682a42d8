//! # OAuth Handshake Controller
//!
//! Drives `start -> callback -> exchange -> identity -> persist` for both providers.
//! Calendly uses PKCE: the verifier lives in a short-lived cookie on the browser and only
//! its S256 challenge is stored with the state row. YouTube uses a plain single-use state.
//!
//! The integration upsert is the only durable write of a handshake; for Calendly the
//! webhook subscription is ensured first so that write carries the webhook id as well.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogger};
use crate::error::IntegrationError;
use crate::models::integration;
use crate::providers::calendly::CalendlyClient;
use crate::providers::youtube::YoutubeClient;
use crate::providers::{OAuthClient, Provider};
use crate::repositories::{IntegrationRepository, NewIntegration, OAuthStateRepository};
use crate::token_manager::TokenManagers;
use crate::webhook_subscriptions::WebhookSubscriptionManager;

/// Cookie carrying the Calendly PKCE verifier between start and callback.
pub const PKCE_COOKIE_NAME: &str = "linktrail_pkce_verifier";
/// The cookie is only sent to the Calendly callback.
pub const PKCE_COOKIE_PATH: &str = "/oauth/calendly";

/// Generate a cryptographically secure state parameter
pub fn generate_secure_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64_url::encode(&bytes)
}

static CODE_VERIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\-._~]{43,128}$").expect("valid code verifier regex")
});

/// RFC 7636 verifier shape: 43-128 characters of `[A-Za-z0-9-._~]`.
pub fn is_valid_code_verifier(verifier: &str) -> bool {
    CODE_VERIFIER.is_match(verifier)
}

/// `true` when `verifier` hashes to the S256 `challenge` issued at start.
pub fn verifier_matches_challenge(verifier: &str, challenge: &str) -> bool {
    let computed =
        PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()));
    subtle::ConstantTimeEq::ct_eq(computed.as_str().as_bytes(), challenge.as_bytes()).into()
}

/// Absolute http(s) URL without a fragment.
pub fn validate_redirect_uri(raw: &str) -> Result<(), IntegrationError> {
    let parsed = Url::parse(raw)
        .map_err(|_| IntegrationError::InvalidRequest("redirect_uri must be an absolute URL".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(IntegrationError::InvalidRequest(
            "redirect_uri must use http or https".to_string(),
        ));
    }
    if parsed.fragment().is_some() {
        return Err(IntegrationError::InvalidRequest(
            "redirect_uri must not contain a fragment".to_string(),
        ));
    }
    Ok(())
}

/// Query parameters a provider sends back to the callback.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the start endpoint hands to the browser.
#[derive(Debug)]
pub struct AuthorizationStart {
    pub authorize_url: String,
    /// Set for Calendly only; goes into [`PKCE_COOKIE_NAME`].
    pub code_verifier: Option<String>,
}

/// Remote cleanup performed by a disconnect.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, ToSchema)]
pub struct RemoteCleanup {
    pub webhook_deleted: bool,
    pub token_revoked: bool,
}

#[derive(Clone)]
pub struct OAuthController {
    calendly: Arc<CalendlyClient>,
    youtube: Arc<YoutubeClient>,
    integrations: IntegrationRepository,
    oauth_states: OAuthStateRepository,
    subscriptions: WebhookSubscriptionManager,
    tokens: TokenManagers,
    audit: AuditLogger,
    public_base_url: String,
    state_ttl_minutes: i64,
}

impl OAuthController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calendly: Arc<CalendlyClient>,
        youtube: Arc<YoutubeClient>,
        integrations: IntegrationRepository,
        oauth_states: OAuthStateRepository,
        subscriptions: WebhookSubscriptionManager,
        tokens: TokenManagers,
        audit: AuditLogger,
        public_base_url: String,
        state_ttl_minutes: i64,
    ) -> Self {
        Self {
            calendly,
            youtube,
            integrations,
            oauth_states,
            subscriptions,
            tokens,
            audit,
            public_base_url,
            state_ttl_minutes,
        }
    }

    /// Server-side redirect URI registered with the provider.
    pub fn callback_url(&self, provider: Provider) -> String {
        format!(
            "{}/oauth/{}/callback",
            self.public_base_url.trim_end_matches('/'),
            provider
        )
    }

    fn ensure_configured(&self, provider: Provider) -> Result<(), IntegrationError> {
        let configured = match provider {
            Provider::Calendly => self.calendly.is_configured(),
            Provider::Youtube => self.youtube.is_configured(),
        };
        if configured {
            Ok(())
        } else {
            Err(IntegrationError::NotConfigured(provider))
        }
    }

    /// Issues a state row and builds the provider's authorization URL.
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<AuthorizationStart, IntegrationError> {
        self.ensure_configured(provider)?;
        let state = generate_secure_state();
        let redirect_uri = self.callback_url(provider);
        let invalid_url =
            |e: url::ParseError| IntegrationError::InvalidRequest(format!("authorize url: {e}"));

        let start = match provider {
            Provider::Calendly => {
                let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
                self.oauth_states
                    .create(
                        user_id,
                        provider,
                        &state,
                        Some(challenge.as_str().to_string()),
                        self.state_ttl_minutes,
                    )
                    .await?;
                AuthorizationStart {
                    authorize_url: self
                        .calendly
                        .authorize_url(&redirect_uri, &state, challenge.as_str())
                        .map_err(invalid_url)?,
                    code_verifier: Some(verifier.secret().to_string()),
                }
            }
            Provider::Youtube => {
                self.oauth_states
                    .create(user_id, provider, &state, None, self.state_ttl_minutes)
                    .await?;
                AuthorizationStart {
                    authorize_url: self
                        .youtube
                        .authorize_url(&redirect_uri, &state)
                        .map_err(invalid_url)?,
                    code_verifier: None,
                }
            }
        };

        info!("Authorization flow started");
        Ok(start)
    }

    /// Validates a callback and completes the handshake for the user the state was issued to.
    ///
    /// Nothing is exchanged unless the state is known, unexpired and unused, and (for
    /// Calendly) the verifier hashes to the stored challenge.
    #[instrument(skip_all, fields(%provider))]
    pub async fn complete(
        &self,
        provider: Provider,
        params: CallbackParams,
        code_verifier: Option<String>,
    ) -> Result<integration::Model, IntegrationError> {
        if let Some(error) = params.error {
            warn!(error = %error, "Provider denied authorization");
            return Err(IntegrationError::ProviderDenied(error));
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(IntegrationError::MissingParameter("code"))?;
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(IntegrationError::StateMismatch)?;

        let issued = self
            .oauth_states
            .consume(provider, &state)
            .await?
            .ok_or(IntegrationError::StateMismatch)?;

        let verifier = match provider {
            Provider::Calendly => {
                let verifier = code_verifier
                    .filter(|v| !v.is_empty())
                    .ok_or(IntegrationError::PkceVerifierMissing)?;
                let challenge = issued
                    .code_challenge
                    .as_deref()
                    .ok_or(IntegrationError::PkceVerifierMismatch)?;
                if !verifier_matches_challenge(&verifier, challenge) {
                    return Err(IntegrationError::PkceVerifierMismatch);
                }
                Some(verifier)
            }
            Provider::Youtube => None,
        };

        let redirect_uri = self.callback_url(provider);
        self.connect(
            issued.user_id,
            provider,
            &code,
            verifier.as_deref(),
            &redirect_uri,
        )
        .await
    }

    /// Exchanges `code`, resolves the provider identity and commits the integration.
    #[instrument(skip(self, code, code_verifier))]
    pub async fn connect(
        &self,
        user_id: Uuid,
        provider: Provider,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> Result<integration::Model, IntegrationError> {
        self.ensure_configured(provider)?;

        let new = match provider {
            Provider::Calendly => {
                let verifier = code_verifier.ok_or(IntegrationError::PkceVerifierMissing)?;
                self.connect_calendly(user_id, code, verifier, redirect_uri)
                    .await?
            }
            Provider::Youtube => self.connect_youtube(user_id, code, redirect_uri).await?,
        };

        let model = self.integrations.upsert_connected(new).await?;
        self.audit.record(
            user_id,
            provider,
            AuditAction::Connect,
            Some(json!({ "external_user_id": model.external_user_id })),
        );
        info!("Integration connected");
        Ok(model)
    }

    async fn connect_calendly(
        &self,
        user_id: Uuid,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<NewIntegration, IntegrationError> {
        let grant = self
            .calendly
            .exchange_code(code, redirect_uri, code_verifier)
            .await
            .map_err(IntegrationError::ExchangeFailed)?;
        let identity = self.calendly.current_user(&grant.access_token).await?;

        let webhook_id = self
            .subscriptions
            .ensure_subscription(
                user_id,
                &grant.access_token,
                &identity.organization_uri,
                &identity.user_uri,
            )
            .await?;

        Ok(NewIntegration {
            user_id,
            provider: Provider::Calendly,
            token_expires_at: grant.expires_at(Utc::now()),
            provider_identity: Some(json!({
                "user_uri": identity.user_uri,
                "organization_uri": identity.organization_uri,
                "name": identity.name,
                "email": identity.email,
            })),
            external_user_id: Some(identity.user_uri),
            external_org_id: Some(identity.organization_uri),
            webhook_id: Some(webhook_id),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        })
    }

    async fn connect_youtube(
        &self,
        user_id: Uuid,
        code: &str,
        redirect_uri: &str,
    ) -> Result<NewIntegration, IntegrationError> {
        let grant = self
            .youtube
            .exchange_code(code, redirect_uri)
            .await
            .map_err(IntegrationError::ExchangeFailed)?;
        let channel = self
            .youtube
            .my_channel(&grant.access_token)
            .await?
            .ok_or_else(|| IntegrationError::IdentityUnavailable {
                provider: Provider::Youtube,
                reason: "account has no YouTube channel".to_string(),
            })?;

        Ok(NewIntegration {
            user_id,
            provider: Provider::Youtube,
            token_expires_at: grant.expires_at(Utc::now()),
            provider_identity: Some(json!({
                "channel_id": channel.channel_id,
                "title": channel.title,
                "description": channel.description,
                "thumbnail_url": channel.thumbnail_url,
            })),
            external_user_id: Some(channel.channel_id),
            external_org_id: None,
            webhook_id: None,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        })
    }

    /// Disconnects locally, after best-effort webhook deletion and token revocation.
    ///
    /// Returns `None` when the user had no row for `provider`.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<RemoteCleanup>, IntegrationError> {
        let Some(model) = self.integrations.find(user_id, provider).await? else {
            return Ok(None);
        };

        let mut cleanup = RemoteCleanup::default();
        if model.is_connected {
            if provider == Provider::Calendly
                && let Some(uri) = model.webhook_id.as_deref()
            {
                cleanup.webhook_deleted = self.delete_webhook(user_id, uri).await;
            }
            cleanup.token_revoked = self.revoke_tokens(user_id, provider).await;
        }

        self.integrations.mark_disconnected(user_id, provider).await?;
        self.audit.record(
            user_id,
            provider,
            AuditAction::Disconnect,
            Some(json!({
                "webhook_deleted": cleanup.webhook_deleted,
                "token_revoked": cleanup.token_revoked,
            })),
        );
        info!(
            webhook_deleted = cleanup.webhook_deleted,
            token_revoked = cleanup.token_revoked,
            "Integration disconnected"
        );

        Ok(Some(cleanup))
    }
    async fn delete_webhook(&self, user_id: Uuid, uri: &str) -> bool {
        let access_token = match self.tokens.calendly.get_valid_access_token(user_id).await {
            Ok(token) => token,
            Err(error) => {
                warn!(error = %error, "No usable token for webhook deletion during disconnect");
                return false;
            }
        };

        match self.subscriptions.delete_one(&access_token, uri).await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "Webhook deletion failed during disconnect");
                false
            }
        }
    }

    /// Revokes whatever the row holds now; a refresh during webhook deletion may have
    /// rotated it.
    async fn revoke_tokens(&self, user_id: Uuid, provider: Provider) -> bool {
        let tokens = match self.integrations.find(user_id, provider).await {
            Ok(Some(model)) => self.integrations.decrypt_tokens(&model),
            Ok(None) => return false,
            Err(error) => {
                warn!(error = %error, "Failed to reload integration for revocation");
                return false;
            }
        };
        let tokens = match tokens {
            Ok(tokens) => tokens,
            Err(error) => {
                warn!(error = %error, "Stored tokens unreadable, skipping revocation");
                return false;
            }
        };

        let Some(token) = tokens.refresh_token.as_deref().or(tokens.access_token.as_deref()) else {
            return false;
        };
        let revoked = match provider {
            Provider::Calendly => self.calendly.revoke(token).await,
            Provider::Youtube => self.youtube.revoke(token).await,
        };
        match revoked {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "Token revocation failed during disconnect");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_state() {
        let state1 = generate_secure_state();
        let state2 = generate_secure_state();

        assert_eq!(state1.len(), 43);
        assert_ne!(state1, state2);
        assert!(state1.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_code_verifier_shape() {
        assert!(is_valid_code_verifier(&"a".repeat(43)));
        assert!(is_valid_code_verifier(&"A1-._~".repeat(22)[..128]));
        assert!(!is_valid_code_verifier(&"a".repeat(42)));
        assert!(!is_valid_code_verifier(&"a".repeat(129)));
        assert!(!is_valid_code_verifier(&format!("{}+", "a".repeat(43))));
    }

    #[test]
    fn test_verifier_matches_rfc7636_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(verifier_matches_challenge(verifier, challenge));
        assert!(!verifier_matches_challenge(verifier, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cN"));
    }

    #[test]
    fn test_generated_pair_matches() {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        assert!(is_valid_code_verifier(verifier.secret()));
        assert!(verifier_matches_challenge(verifier.secret(), challenge.as_str()));
    }

    #[test]
    fn test_redirect_uri_validation() {
        assert!(validate_redirect_uri("https://app.example.com/cb").is_ok());
        assert!(validate_redirect_uri("http://localhost:3000/cb?x=1").is_ok());
        assert!(validate_redirect_uri("/relative").is_err());
        assert!(validate_redirect_uri("ftp://example.com/cb").is_err());
        assert!(validate_redirect_uri("https://example.com/cb#frag").is_err());
    }
}
