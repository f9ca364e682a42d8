//! # Diagnostics Handlers
//!
//! Per-user webhook subscription inspection and forced teardown.

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::audit::AuditAction;
use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, IntegrationError};
use crate::models::integration;
use crate::providers::Provider;
use crate::server::AppState;
use crate::webhook_subscriptions::{DeletionReport, SubscriptionDiagnosis};

async fn connected_integration(
    state: &AppState,
    user_id: Uuid,
    provider: Provider,
) -> Result<integration::Model, IntegrationError> {
    state
        .integrations
        .find_connected(user_id, provider)
        .await?
        .ok_or_else(|| IntegrationError::ResourceNotFound(format!("{provider} integration")))
}

async fn diagnose(
    state: &AppState,
    user_id: Uuid,
    provider: Provider,
) -> Result<Json<SubscriptionDiagnosis>, ApiError> {
    let model = connected_integration(state, user_id, provider).await?;
    let diagnosis = state
        .subscriptions
        .diagnose(state.tokens.get(provider), &model)
        .await?;
    Ok(Json(diagnosis))
}

async fn force_delete(
    state: &AppState,
    user_id: Uuid,
    provider: Provider,
) -> Result<Json<DeletionReport>, ApiError> {
    let model = connected_integration(state, user_id, provider).await?;
    let report = state
        .subscriptions
        .delete_all(state.tokens.get(provider), &model)
        .await?;

    if !report.is_complete() {
        warn!(%user_id, %provider, "Forced teardown incomplete; integration kept");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "WEBHOOK_CLEANUP_FAILED",
            "Some webhook subscriptions could not be deleted",
        )
        .with_details(json!(report)));
    }

    state.audit.record(
        user_id,
        provider,
        AuditAction::ForceDisconnect,
        Some(json!({ "deleted": report.deleted })),
    );
    Ok(Json(report))
}

/// Inspect the caller's Calendly webhook subscriptions
///
/// Lists user-scoped subscriptions and reconciles the stored webhook id with the one
/// targeting this service's callback URL.
#[utoipa::path(
    get,
    path = "/user/diagnose-calendly",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Subscription diagnosis", body = SubscriptionDiagnosis),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 404, description = "Calendly not connected", body = ApiError),
        (status = 502, description = "Calendly request failed", body = ApiError)
    ),
    tag = "diagnostics"
)]
pub async fn diagnose_calendly(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<SubscriptionDiagnosis>, ApiError> {
    diagnose(&state, user_id, Provider::Calendly).await
}

/// Delete every Calendly subscription and the integration
///
/// The integration row is removed only if every deletion succeeded; otherwise the
/// response is 500 with the per-subscription report.
#[utoipa::path(
    delete,
    path = "/user/diagnose-calendly",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All subscriptions deleted", body = DeletionReport),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 404, description = "Calendly not connected", body = ApiError),
        (status = 500, description = "Some deletions failed", body = ApiError)
    ),
    tag = "diagnostics"
)]
pub async fn force_delete_calendly(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<DeletionReport>, ApiError> {
    force_delete(&state, user_id, Provider::Calendly).await
}

/// Inspect the caller's YouTube integration
#[utoipa::path(
    get,
    path = "/user/diagnose-youtube",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Integration diagnosis", body = SubscriptionDiagnosis),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 404, description = "YouTube not connected", body = ApiError)
    ),
    tag = "diagnostics"
)]
pub async fn diagnose_youtube(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<SubscriptionDiagnosis>, ApiError> {
    diagnose(&state, user_id, Provider::Youtube).await
}

/// Remove the caller's YouTube integration
#[utoipa::path(
    delete,
    path = "/user/diagnose-youtube",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Integration removed", body = DeletionReport),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 404, description = "YouTube not connected", body = ApiError)
    ),
    tag = "diagnostics"
)]
pub async fn force_delete_youtube(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<DeletionReport>, ApiError> {
    force_delete(&state, user_id, Provider::Youtube).await
}
