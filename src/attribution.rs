//! # Webhook Ingestion & Attribution
//!
//! Authenticates a Calendly delivery, keeps only `invitee.created`, pulls a short-code
//! correlation token out of the payload, resolves it to a link owned by the webhook's user
//! and records the booking as a call.
//!
//! Most deliveries are not attributable. Those end as [`WebhookOutcome::Ignored`] and are
//! still acknowledged with 200 so Calendly does not retry or disable the subscription.

use std::sync::LazyLock;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use metrics::counter;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::error::IntegrationError;
use crate::providers::Provider;
use crate::repositories::{
    CallRepository, IntegrationRepository, LinkRepository, NewCall, WebhookStatusRepository,
};
use crate::webhook_verification::{CALENDLY_SIGNATURE_HEADER, verify_calendly_signature};

pub const INVITEE_CREATED: &str = "invitee.created";

static SOURCE_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(source|ref|referral|referred|code)\b").expect("valid source regex")
});

static SHORT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid short code regex"));

/// Why a verified delivery was acknowledged without recording anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EventNotHandled,
    NoCorrelationToken,
    LinkNotFound,
    UnknownOwner,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::EventNotHandled => "event_not_handled",
            IgnoreReason::NoCorrelationToken => "no_correlation_token",
            IgnoreReason::LinkNotFound => "link_not_found",
            IgnoreReason::UnknownOwner => "unknown_owner",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Recorded { call_user: Uuid, short_code: String },
    /// The event was recorded by an earlier delivery.
    Duplicate,
    Ignored(IgnoreReason),
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Recorded { .. } => "recorded",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            WebhookOutcome::Ignored(reason) => Some(reason.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    payload: InviteePayload,
}

#[derive(Debug, Default, Deserialize)]
struct InviteePayload {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scheduling_url: Option<String>,
    #[serde(default)]
    tracking: Option<Tracking>,
    #[serde(default)]
    questions_and_answers: Vec<QuestionAnswer>,
    #[serde(default)]
    scheduled_event: Option<ScheduledEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct Tracking {
    #[serde(default)]
    utm_content: Option<String>,
    #[serde(default)]
    utm_campaign: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionAnswer {
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScheduledEvent {
    #[serde(default)]
    event_memberships: Vec<EventMembership>,
}

#[derive(Debug, Deserialize)]
struct EventMembership {
    #[serde(default)]
    user: Option<String>,
}

fn as_short_code(candidate: Option<&str>) -> Option<String> {
    let trimmed = candidate?.trim();
    SHORT_CODE.is_match(trimmed).then(|| trimmed.to_string())
}

fn scheduling_url_param(payload: &InviteePayload, name: &str) -> Option<String> {
    let url = Url::parse(payload.scheduling_url.as_deref()?).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| as_short_code(Some(&value)))
}

/// First valid short code found in the payload, in priority order.
fn extract_correlation_token(payload: &InviteePayload) -> Option<String> {
    let tracking = payload.tracking.as_ref();

    scheduling_url_param(payload, "ref")
        .or_else(|| scheduling_url_param(payload, "utm_content"))
        .or_else(|| as_short_code(tracking.and_then(|t| t.utm_content.as_deref())))
        .or_else(|| as_short_code(tracking.and_then(|t| t.utm_campaign.as_deref())))
        .or_else(|| {
            payload
                .questions_and_answers
                .iter()
                .find(|qa| SOURCE_QUESTION.is_match(&qa.question))
                .and_then(|qa| as_short_code(qa.answer.as_deref()))
        })
}

fn owner_hint(envelope: &EventEnvelope) -> Option<&str> {
    envelope
        .created_by
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            envelope
                .payload
                .scheduled_event
                .as_ref()
                .and_then(|event| event.event_memberships.first())
                .and_then(|membership| membership.user.as_deref())
                .filter(|s| !s.is_empty())
        })
}

fn record_event(provider: Provider, outcome: &'static str) {
    counter!("webhook_events_total", "provider" => provider.as_str(), "outcome" => outcome)
        .increment(1);
}

#[derive(Clone)]
pub struct AttributionEngine {
    integrations: IntegrationRepository,
    links: LinkRepository,
    calls: CallRepository,
    statuses: WebhookStatusRepository,
    signing_key: Option<String>,
    tolerance_seconds: u64,
}

impl AttributionEngine {
    pub fn new(
        integrations: IntegrationRepository,
        links: LinkRepository,
        calls: CallRepository,
        statuses: WebhookStatusRepository,
        signing_key: Option<String>,
        tolerance_seconds: u64,
    ) -> Self {
        Self {
            integrations,
            links,
            calls,
            statuses,
            signing_key,
            tolerance_seconds,
        }
    }

    /// Processes one delivery. `route_user` is the owner taken from a per-user webhook URL.
    ///
    /// Errors map to: missing signature or owner and bad payloads 400, bad signature 401,
    /// missing signing key and failed inserts 500.
    #[instrument(skip_all, fields(%provider, route_user = ?route_user))]
    pub async fn ingest(
        &self,
        provider: Provider,
        route_user: Option<Uuid>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<WebhookOutcome, IntegrationError> {
        if provider != Provider::Calendly {
            return Err(IntegrationError::UnsupportedProvider(provider.to_string()));
        }

        self.authenticate(provider, route_user, headers, body).await?;
        let outcome = self.process(provider, route_user, body).await?;

        if let Err(error) = self.statuses.mark_active(provider, route_user, None).await {
            warn!(error = %error, "Failed to record webhook status");
        }
        Ok(outcome)
    }

    async fn process(
        &self,
        provider: Provider,
        route_user: Option<Uuid>,
        body: &[u8],
    ) -> Result<WebhookOutcome, IntegrationError> {
        let document: JsonValue = serde_json::from_slice(body).map_err(|e| {
            record_event(provider, "rejected");
            IntegrationError::InvalidRequest(format!("webhook body is not valid JSON: {e}"))
        })?;

        let event = document.get("event").and_then(JsonValue::as_str).unwrap_or_default();
        if event != INVITEE_CREATED {
            debug!(event, "Ignoring unhandled webhook event");
            return Ok(self.finish(provider, WebhookOutcome::Ignored(IgnoreReason::EventNotHandled)));
        }

        let envelope: EventEnvelope = serde_json::from_value(document).map_err(|e| {
            record_event(provider, "rejected");
            IntegrationError::InvalidRequest(format!("malformed {INVITEE_CREATED} payload: {e}"))
        })?;

        let owner = match route_user {
            Some(user_id) => user_id,
            None => {
                let hint = owner_hint(&envelope).ok_or_else(|| {
                    record_event(provider, "rejected");
                    IntegrationError::InvalidRequest(
                        "webhook owner could not be determined".to_string(),
                    )
                })?;
                match self
                    .integrations
                    .find_connected_by_external_user(provider, hint)
                    .await?
                {
                    Some(integration) => integration.user_id,
                    None => {
                        return Ok(self.finish(
                            provider,
                            WebhookOutcome::Ignored(IgnoreReason::UnknownOwner),
                        ));
                    }
                }
            }
        };

        let Some(short_code) = extract_correlation_token(&envelope.payload) else {
            return Ok(self.finish(
                provider,
                WebhookOutcome::Ignored(IgnoreReason::NoCorrelationToken),
            ));
        };

        let Some(link) = self.links.find_owned(&short_code, owner).await? else {
            debug!(%short_code, %owner, "No link owned by webhook user");
            return Ok(self.finish(provider, WebhookOutcome::Ignored(IgnoreReason::LinkNotFound)));
        };

        let external_event_id = envelope
            .payload
            .uri
            .clone()
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| {
                record_event(provider, "rejected");
                IntegrationError::InvalidRequest("invitee payload has no uri".to_string())
            })?;

        let occurred_at = envelope
            .payload
            .created_at
            .or(envelope.created_at)
            .unwrap_or_else(Utc::now);

        let inserted = self
            .calls
            .insert_if_absent(NewCall {
                user_id: owner,
                link_id: link.id,
                short_code: short_code.clone(),
                external_event_id,
                contact_email: envelope.payload.email.clone(),
                contact_name: envelope.payload.name.clone(),
                occurred_at,
            })
            .await
            .map_err(|e| {
                record_event(provider, "failed");
                IntegrationError::PersistenceFailed(e)
            })?;

        let outcome = if inserted {
            info!(%owner, %short_code, "Booking attributed to link");
            WebhookOutcome::Recorded {
                call_user: owner,
                short_code,
            }
        } else {
            WebhookOutcome::Duplicate
        };
        Ok(self.finish(provider, outcome))
    }

    async fn authenticate(
        &self,
        provider: Provider,
        route_user: Option<Uuid>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), IntegrationError> {
        let Some(signing_key) = self.signing_key.as_deref() else {
            record_event(provider, "rejected");
            warn!("Webhook signing key not configured");
            return Err(IntegrationError::NotConfigured(provider));
        };

        let header = headers
            .get(CALENDLY_SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok());

        match verify_calendly_signature(body, header, signing_key, self.tolerance_seconds) {
            Ok(()) => Ok(()),
            Err(error) if error.is_missing_signature() => {
                record_event(provider, "rejected");
                Err(IntegrationError::MissingParameter("Calendly-Webhook-Signature"))
            }
            Err(error) => {
                record_event(provider, "signature_invalid");
                warn!(error = %error, "Webhook signature rejected");
                if let Err(error) = self
                    .statuses
                    .mark_inactive(provider, route_user, "signature_invalid")
                    .await
                {
                    warn!(error = %error, "Failed to record webhook status");
                }
                Err(IntegrationError::SignatureInvalid)
            }
        }
    }

    fn finish(&self, provider: Provider, outcome: WebhookOutcome) -> WebhookOutcome {
        record_event(provider, outcome.as_str());
        outcome
    }
}
