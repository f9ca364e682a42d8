//! # Webhook Handlers
//!
//! Inbound provider deliveries. Signature checks, owner resolution and attribution live
//! in [`crate::attribution`]; these handlers only carry the raw body through and turn the
//! outcome into an acknowledgement.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::attribution::WebhookOutcome;
use crate::error::{ApiError, IntegrationError};
use crate::handlers::parse_provider;
use crate::server::AppState;

/// Acknowledgement returned for every verified delivery
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    /// recorded | duplicate | ignored
    pub outcome: String,
    /// Set when the delivery was ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        Self {
            outcome: outcome.as_str().to_string(),
            reason: outcome.reason().map(str::to_string),
        }
    }
}

async fn ingest(
    state: &AppState,
    provider: &str,
    route_user: Option<Uuid>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let provider = parse_provider(provider)?;
    debug!(%provider, route_user = ?route_user, bytes = body.len(), "Webhook received");

    let outcome = state
        .attribution
        .ingest(provider, route_user, headers, body)
        .await?;
    Ok(Json(outcome.into()))
}

/// Organization-level webhook
///
/// The owner is resolved from the event payload.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    params(
        ("provider" = String, Path, description = "Only calendly is supported"),
        ("Calendly-Webhook-Signature" = String, Header, description = "t=<unix seconds>,v1=<hex HMAC-SHA256>")
    ),
    request_body(content = Object, description = "Provider event", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Missing signature, malformed body or unsupported provider", body = ApiError),
        (status = 401, description = "Signature invalid or stale", body = ApiError),
        (status = 413, description = "Body too large"),
        (status = 500, description = "Signing key not configured or storage failure", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    ingest(&state, &provider, None, &headers, &body).await
}

/// Per-user webhook
///
/// The owner is the `user_id` in the path; the payload is still verified and attributed
/// against that user's links only.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}/user/{user_id}",
    params(
        ("provider" = String, Path, description = "Only calendly is supported"),
        ("user_id" = String, Path, description = "Owning user id (UUID)"),
        ("Calendly-Webhook-Signature" = String, Header, description = "t=<unix seconds>,v1=<hex HMAC-SHA256>")
    ),
    request_body(content = Object, description = "Provider event", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed user id, missing signature or malformed body", body = ApiError),
        (status = 401, description = "Signature invalid or stale", body = ApiError),
        (status = 413, description = "Body too large"),
        (status = 500, description = "Signing key not configured or storage failure", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn ingest_user_webhook(
    State(state): State<AppState>,
    Path((provider, user_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let user_id = user_id.parse::<Uuid>().map_err(|_| {
        IntegrationError::InvalidRequest("user id must be a valid UUID".to_string())
    })?;
    ingest(&state, &provider, Some(user_id), &headers, &body).await
}
