//! # Token Lifecycle Manager
//!
//! Hands out a valid bearer token for a `(user, provider)` pair, refreshing it through the
//! provider's token endpoint when it is inside the expiry skew window. One manager exists
//! per provider; both share this contract.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogger};
use crate::error::IntegrationError;
use crate::models::integration;
use crate::providers::{OAuthClient, Provider, ProviderError};
use crate::repositories::IntegrationRepository;

#[derive(Clone)]
pub struct TokenManager {
    client: Arc<dyn OAuthClient>,
    integrations: IntegrationRepository,
    audit: AuditLogger,
    skew: Duration,
}

impl TokenManager {
    pub fn new(
        client: Arc<dyn OAuthClient>,
        integrations: IntegrationRepository,
        audit: AuditLogger,
        skew: Duration,
    ) -> Self {
        Self {
            client,
            integrations,
            audit,
            skew,
        }
    }

    pub fn provider(&self) -> Provider {
        self.client.provider()
    }

    /// Returns a usable access token, refreshing at most once.
    ///
    /// A row without an expiry is trusted as-is. Rows inside the skew window are refreshed
    /// and the new token is returned; a failed refresh is `TokenExpiredUnrefreshable` and the
    /// row is left in place for the user to reconnect.
    #[instrument(skip_all, fields(provider = %self.provider(), %user_id))]
    pub async fn get_valid_access_token(&self, user_id: Uuid) -> Result<String, IntegrationError> {
        self.resolve_access_token(user_id)
            .await
            .map(|resolved| resolved.access_token)
    }

    async fn resolve_access_token(&self, user_id: Uuid) -> Result<ResolvedToken, IntegrationError> {
        let model = self.load_connected(user_id).await?;
        let tokens = self.integrations.decrypt_tokens(&model)?;

        let Some(access_token) = tokens.access_token else {
            return self
                .refresh_with(&model, tokens.refresh_token)
                .await
                .map(ResolvedToken::refreshed);
        };

        match model.token_expires_at {
            None => Ok(ResolvedToken::stored(access_token)),
            Some(expires_at) if Utc::now() < expires_at.with_timezone(&Utc) - self.skew => {
                debug!("Stored access token is fresh");
                Ok(ResolvedToken::stored(access_token))
            }
            Some(_) => {
                debug!("Access token inside skew window, refreshing");
                self.refresh_with(&model, tokens.refresh_token)
                    .await
                    .map(ResolvedToken::refreshed)
            }
        }
    }

    /// Refreshes regardless of the stored expiry.
    #[instrument(skip_all, fields(provider = %self.provider(), %user_id))]
    pub async fn force_refresh(&self, user_id: Uuid) -> Result<String, IntegrationError> {
        let model = self.load_connected(user_id).await?;
        let tokens = self.integrations.decrypt_tokens(&model)?;
        self.refresh_with(&model, tokens.refresh_token).await
    }

    /// Runs `op` with a valid token. A 401 on a stored token triggers one forced refresh and
    /// one retry. A 401 on a token refreshed during this call means the grant is dead.
    pub async fn call_with_token<T, F, Fut>(
        &self,
        user_id: Uuid,
        op: F,
    ) -> Result<T, IntegrationError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let resolved = self.resolve_access_token(user_id).await?;
        match op(resolved.access_token).await {
            Ok(value) => Ok(value),
            Err(error) if error.is_unauthorized() && resolved.refreshed => {
                warn!(
                    provider = %self.provider(),
                    %user_id,
                    "Provider rejected a freshly refreshed token"
                );
                Err(self.rejected_refreshed_token())
            }
            Err(error) if error.is_unauthorized() => {
                info!(
                    provider = %self.provider(),
                    %user_id,
                    "Provider rejected access token, forcing refresh"
                );
                let token = self.force_refresh(user_id).await?;
                op(token).await.map_err(|error| {
                    if error.is_unauthorized() {
                        self.rejected_refreshed_token()
                    } else {
                        IntegrationError::ProviderRequestFailed(error)
                    }
                })
            }
            Err(error) => Err(IntegrationError::ProviderRequestFailed(error)),
        }
    }

    fn rejected_refreshed_token(&self) -> IntegrationError {
        IntegrationError::TokenExpiredUnrefreshable {
            provider: self.provider(),
            reason: "provider rejected the refreshed token".to_string(),
        }
    }

    async fn load_connected(&self, user_id: Uuid) -> Result<integration::Model, IntegrationError> {
        self.integrations
            .find_connected(user_id, self.provider())
            .await?
            .ok_or(IntegrationError::NotConnected {
                provider: self.provider(),
            })
    }

    async fn refresh_with(
        &self,
        model: &integration::Model,
        refresh_token: Option<String>,
    ) -> Result<String, IntegrationError> {
        let provider = self.provider();

        let Some(refresh_token) = refresh_token else {
            warn!(%provider, user_id = %model.user_id, "No refresh token stored");
            counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => "missing_refresh_token")
                .increment(1);
            self.audit.record(
                model.user_id,
                provider,
                AuditAction::RefreshFailed,
                Some(json!({ "reason": "missing_refresh_token" })),
            );
            return Err(IntegrationError::TokenExpiredUnrefreshable {
                provider,
                reason: "no refresh token stored".to_string(),
            });
        };

        match self.client.refresh(&refresh_token).await {
            Ok(grant) => {
                counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => "success")
                    .increment(1);
                let expires_at = grant.expires_at(Utc::now());

                // Best-effort write: the caller still receives the new token.
                if let Err(error) = self
                    .integrations
                    .update_tokens(
                        model.user_id,
                        provider,
                        &grant.access_token,
                        grant.refresh_token.as_deref(),
                        expires_at,
                    )
                    .await
                {
                    warn!(
                        %provider,
                        user_id = %model.user_id,
                        error = %error,
                        "Failed to persist refreshed token"
                    );
                }

                info!(%provider, user_id = %model.user_id, "Access token refreshed");
                Ok(grant.access_token)
            }
            Err(error) => {
                counter!("token_refresh_total", "provider" => provider.as_str(), "outcome" => "failure")
                    .increment(1);
                warn!(
                    %provider,
                    user_id = %model.user_id,
                    status = ?error.status(),
                    kind = ?error.kind(),
                    "Token refresh failed"
                );
                self.audit.record(
                    model.user_id,
                    provider,
                    AuditAction::RefreshFailed,
                    Some(json!({ "status": error.status(), "kind": error.kind() })),
                );
                Err(IntegrationError::TokenExpiredUnrefreshable {
                    provider,
                    reason: error.to_string(),
                })
            }
        }
    }
}

struct ResolvedToken {
    access_token: String,
    refreshed: bool,
}

impl ResolvedToken {
    fn stored(access_token: String) -> Self {
        Self {
            access_token,
            refreshed: false,
        }
    }

    fn refreshed(access_token: String) -> Self {
        Self {
            access_token,
            refreshed: true,
        }
    }
}

/// The per-provider managers.
#[derive(Clone)]
pub struct TokenManagers {
    pub calendly: TokenManager,
    pub youtube: TokenManager,
}

impl TokenManagers {
    pub fn get(&self, provider: Provider) -> &TokenManager {
        match provider {
            Provider::Calendly => &self.calendly,
            Provider::Youtube => &self.youtube,
        }
    }
}
