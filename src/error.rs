//! # Error Handling
//!
//! Unified error handling for the linktrail API: a problem+json envelope with trace ID
//! propagation, and the [`IntegrationError`] taxonomy shared by the OAuth, token,
//! webhook and cache subsystems.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::providers::{Provider, ProviderError};
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    #[serde(rename = "error")]
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Current trace ID from the request scope, falling back to a generated correlation ID
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Upstream provider error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderErrorDetails {
    /// Provider identifier (e.g., "calendly", "youtube")
    pub provider: String,
    /// HTTP status code from upstream, absent for timeouts and transport failures
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_FAILED",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create a provider upstream error (502) carrying a truncated body snippet.
pub fn provider_error(provider: String, status: Option<u16>, body: Option<String>) -> ApiError {
    let details = ProviderErrorDetails {
        provider: provider.clone(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("Provider {} returned error status {}", provider, status),
        None => format!("Provider {} could not be reached", provider),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", &message).with_details(json!(details))
}

/// Failures of the integration lifecycle, from handshake to webhook ingestion.
#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("{provider} is not connected")]
    NotConnected { provider: Provider },

    #[error("{provider} token could not be refreshed: {reason}")]
    TokenExpiredUnrefreshable { provider: Provider, reason: String },

    #[error("{provider} identity unavailable: {reason}")]
    IdentityUnavailable { provider: Provider, reason: String },

    #[error(transparent)]
    ProviderRequestFailed(#[from] ProviderError),

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(ProviderError),

    #[error("webhook signature invalid")]
    SignatureInvalid,

    #[error("webhook subscription setup failed: {0}")]
    WebhookSetupFailed(ProviderError),

    #[error("provider reported an existing webhook but none targets {callback_url}")]
    ConflictUnresolved { callback_url: String },

    #[error("{0} not found")]
    ResourceNotFound(String),

    #[error("persistence failed: {0:#}")]
    PersistenceFailed(anyhow::Error),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("oauth state is missing, expired or already used")]
    StateMismatch,

    #[error("pkce code verifier missing")]
    PkceVerifierMissing,

    #[error("pkce code verifier does not match the issued challenge")]
    PkceVerifierMismatch,

    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("provider denied authorization: {0}")]
    ProviderDenied(String),

    #[error("{0} integration is not configured")]
    NotConfigured(Provider),
}

impl From<sea_orm::DbErr> for IntegrationError {
    fn from(error: sea_orm::DbErr) -> Self {
        IntegrationError::PersistenceFailed(error.into())
    }
}

impl From<anyhow::Error> for IntegrationError {
    fn from(error: anyhow::Error) -> Self {
        IntegrationError::PersistenceFailed(error)
    }
}

impl IntegrationError {
    /// Machine-readable code placed in browser redirects. Never carries provider text.
    pub fn redirect_code(&self) -> &'static str {
        match self {
            IntegrationError::MissingParameter(_) => "missing_code",
            IntegrationError::StateMismatch => "state_mismatch",
            IntegrationError::PkceVerifierMissing => "pkce_verifier_missing",
            IntegrationError::PkceVerifierMismatch => "pkce_verifier_mismatch",
            IntegrationError::ProviderDenied(_) => "provider_denied",
            IntegrationError::ExchangeFailed(_) | IntegrationError::ProviderRequestFailed(_) => {
                "exchange_failed"
            }
            IntegrationError::IdentityUnavailable { .. } => "identity_unavailable",
            IntegrationError::WebhookSetupFailed(_) => "webhook_setup_failed",
            IntegrationError::ConflictUnresolved { .. } => "webhook_conflict_unresolved",
            IntegrationError::PersistenceFailed(_) => "persistence_failed",
            IntegrationError::NotConfigured(_) => "not_configured",
            _ => "invalid_request",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IntegrationError::Unauthenticated(_)
            | IntegrationError::ExchangeFailed(_)
            | IntegrationError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            IntegrationError::NotConnected { .. }
            | IntegrationError::TokenExpiredUnrefreshable { .. }
            | IntegrationError::IdentityUnavailable { .. }
            | IntegrationError::InvalidRequest(_)
            | IntegrationError::UnsupportedProvider(_)
            | IntegrationError::StateMismatch
            | IntegrationError::PkceVerifierMissing
            | IntegrationError::PkceVerifierMismatch
            | IntegrationError::MissingParameter(_)
            | IntegrationError::ProviderDenied(_) => StatusCode::BAD_REQUEST,
            IntegrationError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            IntegrationError::ProviderRequestFailed(_) => StatusCode::BAD_GATEWAY,
            IntegrationError::WebhookSetupFailed(_)
            | IntegrationError::ConflictUnresolved { .. }
            | IntegrationError::PersistenceFailed(_)
            | IntegrationError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            IntegrationError::Unauthenticated(_) => "UNAUTHENTICATED",
            IntegrationError::NotConnected { .. } => "NOT_CONNECTED",
            IntegrationError::TokenExpiredUnrefreshable { .. } => "TOKEN_EXPIRED_UNREFRESHABLE",
            IntegrationError::IdentityUnavailable { .. } => "IDENTITY_UNAVAILABLE",
            IntegrationError::ProviderRequestFailed(_) => "PROVIDER_ERROR",
            IntegrationError::ExchangeFailed(_) => "EXCHANGE_FAILED",
            IntegrationError::SignatureInvalid => "SIGNATURE_INVALID",
            IntegrationError::WebhookSetupFailed(_) => "WEBHOOK_SETUP_FAILED",
            IntegrationError::ConflictUnresolved { .. } => "WEBHOOK_CONFLICT_UNRESOLVED",
            IntegrationError::ResourceNotFound(_) => "NOT_FOUND",
            IntegrationError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            IntegrationError::InvalidRequest(_) | IntegrationError::MissingParameter(_) => {
                "VALIDATION_FAILED"
            }
            IntegrationError::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            IntegrationError::StateMismatch => "STATE_MISMATCH",
            IntegrationError::PkceVerifierMissing => "PKCE_VERIFIER_MISSING",
            IntegrationError::PkceVerifierMismatch => "PKCE_VERIFIER_MISMATCH",
            IntegrationError::ProviderDenied(_) => "PROVIDER_DENIED",
            IntegrationError::NotConfigured(_) => "NOT_CONFIGURED",
        }
    }
}

impl From<IntegrationError> for ApiError {
    fn from(error: IntegrationError) -> Self {
        match &error {
            IntegrationError::ProviderRequestFailed(inner) => {
                tracing::warn!(error = %inner, "Provider request failed");
                return provider_error(
                    inner.provider().to_string(),
                    inner.status(),
                    inner.body().map(str::to_string),
                );
            }
            IntegrationError::PersistenceFailed(inner) => {
                tracing::error!("Persistence failure: {:?}", inner);
                return ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_FAILED",
                    "A storage error occurred",
                );
            }
            IntegrationError::ExchangeFailed(inner) | IntegrationError::WebhookSetupFailed(inner) => {
                tracing::warn!(error = %inner, status = ?inner.status(), "Provider rejected request");
            }
            _ => {}
        }

        let api_error = ApiError::new(error.status_code(), error.error_code(), &error.to_string());
        match &error {
            IntegrationError::TokenExpiredUnrefreshable { provider, .. }
            | IntegrationError::NotConnected { provider } => {
                api_error.with_details(json!({ "provider": provider, "action": "reconnect" }))
            }
            _ => api_error,
        }
    }
}

impl IntoResponse for IntegrationError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
