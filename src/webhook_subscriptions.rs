//! # Webhook Subscription Manager
//!
//! Creates, reconciles, inspects and tears down Calendly webhook subscriptions. Each user
//! gets a callback URL of its own, `{PUBLIC_BASE_URL}/webhooks/calendly/user/{user_id}`,
//! which is also the key used to recognise an existing subscription after Calendly reports
//! that one "already exists".

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::IntegrationError;
use crate::models::{integration, webhook_status};
use crate::providers::calendly::{CalendlyClient, WebhookSubscription};
use crate::providers::{Provider, ProviderError, ProviderErrorKind};
use crate::repositories::{IntegrationRepository, WebhookStatusRepository};
use crate::token_manager::TokenManager;

/// Result of inspecting a user's subscriptions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionDiagnosis {
    pub provider: Provider,
    pub expected_callback_url: Option<String>,
    pub stored_webhook_id: Option<String>,
    /// Whether the stored id is among the listed subscriptions
    pub stored_webhook_found: bool,
    /// URI of the subscription targeting the expected callback URL, if any
    pub callback_match: Option<String>,
    /// The stored id was replaced with `callback_match`
    pub reconciled: bool,
    pub subscriptions: Vec<WebhookSubscription>,
    #[schema(value_type = Option<Object>)]
    pub status: Option<webhook_status::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeletionFailure {
    pub uri: String,
    pub error: String,
}

/// Joined outcome of a bulk delete.
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct DeletionReport {
    pub attempted: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<DeletionFailure>,
    /// Whether the integration row was removed afterwards
    pub integration_deleted: bool,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct WebhookSubscriptionManager {
    calendly: Arc<CalendlyClient>,
    integrations: IntegrationRepository,
    statuses: WebhookStatusRepository,
    public_base_url: String,
}

fn record_outcome(outcome: &'static str) {
    counter!("webhook_subscription_total", "outcome" => outcome).increment(1);
}

impl WebhookSubscriptionManager {
    pub fn new(
        calendly: Arc<CalendlyClient>,
        integrations: IntegrationRepository,
        statuses: WebhookStatusRepository,
        public_base_url: String,
    ) -> Self {
        Self {
            calendly,
            integrations,
            statuses,
            public_base_url,
        }
    }

    pub fn callback_url(&self, user_id: Uuid) -> String {
        format!(
            "{}/webhooks/calendly/user/{}",
            self.public_base_url.trim_end_matches('/'),
            user_id
        )
    }

    /// Returns the URI of a subscription delivering to this user's callback URL, creating
    /// one when needed.
    ///
    /// An "already exists" conflict is reconciled by listing the organization's user-scoped
    /// subscriptions and matching the callback URL exactly. A conflict with no match is
    /// `ConflictUnresolved`; every other failure is `WebhookSetupFailed`.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn ensure_subscription(
        &self,
        user_id: Uuid,
        access_token: &str,
        organization_uri: &str,
        user_uri: &str,
    ) -> Result<String, IntegrationError> {
        let callback_url = self.callback_url(user_id);

        let webhook_id = match self
            .calendly
            .create_webhook_subscription(access_token, &callback_url, organization_uri, user_uri)
            .await
        {
            Ok(subscription) => {
                record_outcome("created");
                info!(uri = %subscription.uri, "Webhook subscription created");
                subscription.uri
            }
            Err(error) if error.kind() == ProviderErrorKind::Conflict => {
                info!("Webhook subscription already exists, reconciling");
                let existing = self
                    .calendly
                    .list_webhook_subscriptions(access_token, organization_uri, user_uri)
                    .await
                    .map_err(|e| {
                        record_outcome("failed");
                        IntegrationError::WebhookSetupFailed(e)
                    })?;

                match find_by_callback(&existing, &callback_url) {
                    Some(found) => {
                        record_outcome("reconciled");
                        found.uri.clone()
                    }
                    None => {
                        record_outcome("conflict_unresolved");
                        warn!(
                            listed = existing.len(),
                            "Calendly reported an existing subscription but none matches"
                        );
                        return Err(IntegrationError::ConflictUnresolved { callback_url });
                    }
                }
            }
            Err(error) => {
                record_outcome("failed");
                return Err(IntegrationError::WebhookSetupFailed(error));
            }
        };

        if let Err(error) = self
            .statuses
            .mark_active(Provider::Calendly, Some(user_id), Some(&webhook_id))
            .await
        {
            warn!(error = %error, "Failed to record webhook status");
        }

        Ok(webhook_id)
    }

    /// Lists subscriptions for a connected integration and reconciles the stored id with
    /// the one targeting the expected callback URL.
    #[instrument(skip_all, fields(user_id = %model.user_id, provider = %tokens.provider()))]
    pub async fn diagnose(
        &self,
        tokens: &TokenManager,
        model: &integration::Model,
    ) -> Result<SubscriptionDiagnosis, IntegrationError> {
        let provider = tokens.provider();
        let status = match self.statuses.find(provider, Some(model.user_id)).await {
            Ok(status) => status,
            Err(error) => {
                warn!(error = %error, "Failed to load webhook status");
                None
            }
        };

        if provider != Provider::Calendly {
            return Ok(SubscriptionDiagnosis {
                provider,
                expected_callback_url: None,
                stored_webhook_id: model.webhook_id.clone(),
                stored_webhook_found: false,
                callback_match: None,
                reconciled: false,
                subscriptions: Vec::new(),
                status,
            });
        }

        let callback_url = self.callback_url(model.user_id);
        let subscriptions = self.list_for(tokens, model).await?;

        let stored_webhook_found = model
            .webhook_id
            .as_deref()
            .is_some_and(|id| subscriptions.iter().any(|s| s.uri == id));
        let callback_match = find_by_callback(&subscriptions, &callback_url).map(|s| s.uri.clone());

        let mut reconciled = false;
        if let Some(found) = &callback_match
            && model.webhook_id.as_deref() != Some(found.as_str())
        {
            self.integrations
                .set_webhook_id(model.user_id, provider, Some(found.clone()))
                .await?;
            if let Err(error) = self
                .statuses
                .mark_active(provider, Some(model.user_id), Some(found))
                .await
            {
                warn!(error = %error, "Failed to record webhook status");
            }
            info!(uri = %found, "Reconciled stored webhook id");
            reconciled = true;
        }

        Ok(SubscriptionDiagnosis {
            provider,
            expected_callback_url: Some(callback_url),
            stored_webhook_id: model.webhook_id.clone(),
            stored_webhook_found,
            callback_match,
            reconciled,
            subscriptions,
            status,
        })
    }

    /// Deletes every listed subscription concurrently, then hard-deletes the integration
    /// row only if all deletions succeeded.
    #[instrument(skip_all, fields(user_id = %model.user_id, provider = %tokens.provider()))]
    pub async fn delete_all(
        &self,
        tokens: &TokenManager,
        model: &integration::Model,
    ) -> Result<DeletionReport, IntegrationError> {
        let provider = tokens.provider();
        let mut report = DeletionReport::default();

        if provider == Provider::Calendly {
            let subscriptions = self.list_for(tokens, model).await?;
            report.attempted = subscriptions.len();

            if !subscriptions.is_empty() {
                let access_token = tokens.get_valid_access_token(model.user_id).await?;
                let mut handles = Vec::new();
                for subscription in subscriptions {
                    let client = self.calendly.clone();
                    let token = access_token.clone();
                    let uri = subscription.uri.clone();
                    let handle = tokio::spawn(async move {
                        client.delete_webhook_subscription(&token, &subscription.uri).await
                    });
                    handles.push((uri, handle));
                }

                for (uri, handle) in handles {
                    match handle.await {
                        Ok(Ok(())) => report.deleted.push(uri),
                        // Already gone counts as deleted.
                        Ok(Err(error)) if error.kind() == ProviderErrorKind::NotFound => {
                            report.deleted.push(uri)
                        }
                        Ok(Err(error)) => report.failures.push(DeletionFailure {
                            uri,
                            error: error.to_string(),
                        }),
                        Err(join_error) => report.failures.push(DeletionFailure {
                            uri,
                            error: join_error.to_string(),
                        }),
                    }
                }
            }
        }

        if !report.is_complete() {
            warn!(
                failed = report.failures.len(),
                attempted = report.attempted,
                "Some webhook subscriptions could not be deleted"
            );
            return Ok(report);
        }

        report.integration_deleted = self.integrations.hard_delete(model.user_id, provider).await? > 0;
        if let Err(error) = self
            .statuses
            .mark_inactive(provider, Some(model.user_id), "force_disconnected")
            .await
        {
            warn!(error = %error, "Failed to record webhook status");
        }

        Ok(report)
    }

    /// Best-effort removal of a single subscription during disconnect.
    pub async fn delete_one(&self, access_token: &str, uri: &str) -> Result<(), ProviderError> {
        match self.calendly.delete_webhook_subscription(access_token, uri).await {
            Err(error) if error.kind() == ProviderErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn list_for(
        &self,
        tokens: &TokenManager,
        model: &integration::Model,
    ) -> Result<Vec<WebhookSubscription>, IntegrationError> {
        let (Some(organization_uri), Some(user_uri)) =
            (model.external_org_id.clone(), model.external_user_id.clone())
        else {
            return Err(IntegrationError::IdentityUnavailable {
                provider: Provider::Calendly,
                reason: "integration has no organization or user uri".to_string(),
            });
        };

        let client = self.calendly.clone();
        tokens
            .call_with_token(model.user_id, move |token| {
                let client = client.clone();
                let organization_uri = organization_uri.clone();
                let user_uri = user_uri.clone();
                async move {
                    client
                        .list_webhook_subscriptions(&token, &organization_uri, &user_uri)
                        .await
                }
            })
            .await
    }
}

fn find_by_callback<'a>(
    subscriptions: &'a [WebhookSubscription],
    callback_url: &str,
) -> Option<&'a WebhookSubscription> {
    subscriptions.iter().find(|s| s.callback_url == callback_url)
}
