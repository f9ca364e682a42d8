//! # Integration Handlers
//!
//! Programmatic connect, listing and disconnect of a user's provider integrations.

use axum::{
    extract::{Query, State, rejection::JsonRejection},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, IntegrationError};
use crate::handlers::parse_provider;
use crate::models::integration;
use crate::oauth::{RemoteCleanup, is_valid_code_verifier, validate_redirect_uri};
use crate::providers::Provider;
use crate::server::AppState;

/// Body of `POST /integrations/connect`
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// calendly | youtube
    pub provider: String,
    /// Authorization code returned by the provider
    pub code: String,
    /// PKCE verifier; required for Calendly
    #[serde(default)]
    pub code_verifier: Option<String>,
    /// Redirect URI used when the code was issued; defaults to this service's callback
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Public view of an integration. Tokens never leave the service.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntegrationView {
    pub provider: String,
    pub is_connected: bool,
    #[schema(value_type = Option<Object>)]
    pub provider_identity: Option<JsonValue>,
    pub external_user_id: Option<String>,
    pub webhook_id: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&integration::Model> for IntegrationView {
    fn from(model: &integration::Model) -> Self {
        Self {
            provider: model.provider.clone(),
            is_connected: model.is_connected,
            provider_identity: model.provider_identity.clone(),
            external_user_id: model.external_user_id.clone(),
            webhook_id: model.webhook_id.clone(),
            token_expires_at: model.token_expires_at.map(|d| d.with_timezone(&Utc)),
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntegrationListResponse {
    pub integrations: Vec<IntegrationView>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProviderQuery {
    /// calendly | youtube
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DisconnectResponse {
    pub provider: Provider,
    pub disconnected: bool,
    /// Absent when the user had no integration for the provider
    pub remote_cleanup: Option<RemoteCleanup>,
}

/// Connect with an authorization code obtained by the client
#[utoipa::path(
    post,
    path = "/integrations/connect",
    security(("bearer_auth" = [])),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Integration connected", body = IntegrationView),
        (status = 400, description = "Invalid request or missing PKCE verifier", body = ApiError),
        (status = 401, description = "Missing token or code exchange rejected", body = ApiError),
        (status = 500, description = "Webhook setup or persistence failure", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn connect_integration(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<IntegrationView>, ApiError> {
    let Json(request) = payload?;
    let provider = parse_provider(&request.provider)?;

    if request.code.trim().is_empty() {
        return Err(IntegrationError::MissingParameter("code").into());
    }

    let verifier = request.code_verifier.filter(|v| !v.is_empty());
    match (provider, verifier.as_deref()) {
        (Provider::Calendly, None) => return Err(IntegrationError::PkceVerifierMissing.into()),
        (_, Some(verifier)) if !is_valid_code_verifier(verifier) => {
            return Err(IntegrationError::InvalidRequest(
                "code_verifier must be 43-128 characters of [A-Za-z0-9-._~]".to_string(),
            )
            .into());
        }
        _ => {}
    }

    let redirect_uri = match request.redirect_uri {
        Some(uri) => {
            validate_redirect_uri(&uri)?;
            uri
        }
        None => state.oauth.callback_url(provider),
    };

    let model = state
        .oauth
        .connect(
            user_id,
            provider,
            request.code.trim(),
            verifier.as_deref(),
            &redirect_uri,
        )
        .await?;

    Ok(Json(IntegrationView::from(&model)))
}

/// List the caller's integrations
#[utoipa::path(
    get,
    path = "/integrations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Integrations for the caller", body = IntegrationListResponse),
        (status = 401, description = "Missing or invalid token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<IntegrationListResponse>, ApiError> {
    let rows = state
        .integrations
        .list_for_user(user_id)
        .await
        .map_err(IntegrationError::from)?;

    Ok(Json(IntegrationListResponse {
        integrations: rows.iter().map(IntegrationView::from).collect(),
    }))
}

/// Disconnect a provider
///
/// Deletes the Calendly webhook and revokes the token on a best-effort basis, then marks
/// the integration disconnected. Disconnecting twice is not an error.
#[utoipa::path(
    delete,
    path = "/integrations",
    security(("bearer_auth" = [])),
    params(ProviderQuery),
    responses(
        (status = 200, description = "Integration disconnected", body = DisconnectResponse),
        (status = 400, description = "Missing or unsupported provider", body = ApiError),
        (status = 401, description = "Missing or invalid token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn disconnect_integration(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let raw = query
        .provider
        .ok_or(IntegrationError::MissingParameter("provider"))?;
    let provider = parse_provider(&raw)?;

    let remote_cleanup = state.oauth.disconnect(user_id, provider).await?;

    Ok(Json(DisconnectResponse {
        provider,
        disconnected: true,
        remote_cleanup,
    }))
}
