//! # OAuth Handlers
//!
//! Browser-facing half of the handshake. `start` sends the user to the provider and
//! `callback` finishes the exchange, then bounces the browser back to the app.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::handlers::parse_provider;
use crate::oauth::{CallbackParams, PKCE_COOKIE_NAME, PKCE_COOKIE_PATH};
use crate::providers::Provider;
use crate::server::AppState;

/// Authorization URL handed to API clients that asked for JSON
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    pub authorize_url: String,
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

fn pkce_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((PKCE_COOKIE_NAME, value))
        .path(PKCE_COOKIE_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Start the OAuth handshake
///
/// Persists a single-use state and redirects to the provider. For Calendly the PKCE
/// verifier is stored in an HttpOnly cookie scoped to the callback path.
#[utoipa::path(
    get,
    path = "/oauth/{provider}/start",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "calendly | youtube")
    ),
    responses(
        (status = 302, description = "Redirect to the provider's consent screen"),
        (status = 200, description = "Authorization URL (Accept: application/json)", body = AuthorizeUrlResponse),
        (status = 400, description = "Unsupported provider", body = ApiError),
        (status = 401, description = "Missing or invalid session", body = ApiError),
        (status = 500, description = "Provider not configured or state not persisted", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn start_oauth(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(provider): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;
    let start = state.oauth.start(user_id, provider).await?;

    let jar = match start.code_verifier {
        Some(verifier) => {
            let secure = state.config.public_base_url.starts_with("https://");
            jar.add(pkce_cookie(verifier, secure))
        }
        None => jar,
    };

    if wants_json(&headers) {
        return Ok((
            jar,
            Json(AuthorizeUrlResponse {
                authorize_url: start.authorize_url,
            }),
        )
            .into_response());
    }

    Ok((jar, found(&start.authorize_url)).into_response())
}

/// Where the browser lands after the callback.
fn app_redirect(app_base_url: &str, pairs: &[(&str, &str)]) -> Result<String, ApiError> {
    let mut url = Url::parse(&format!(
        "{}/integrations",
        app_base_url.trim_end_matches('/')
    ))
    .map_err(|e| anyhow::anyhow!("APP_BASE_URL is not a valid URL: {e}"))?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.into())
}

/// Provider redirect target
///
/// Validates state and PKCE, exchanges the code and connects the integration, then
/// redirects to `{APP_BASE_URL}/integrations?connected={provider}`. Failures redirect
/// with `?provider={provider}&error={code}`; clients sending `Accept: application/json`
/// get the error envelope instead.
#[utoipa::path(
    get,
    path = "/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "calendly | youtube"),
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "State issued by the start endpoint"),
        ("error" = Option<String>, Query, description = "Provider error, e.g. access_denied")
    ),
    responses(
        (status = 302, description = "Redirect to the app with the outcome"),
        (status = 400, description = "Missing code, state mismatch or PKCE failure", body = ApiError),
        (status = 401, description = "Code exchange rejected", body = ApiError),
        (status = 500, description = "Webhook setup or persistence failure", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let verifier = jar.get(PKCE_COOKIE_NAME).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(PKCE_COOKIE_NAME).path(PKCE_COOKIE_PATH));

    let result = match parse_provider(&provider) {
        Ok(parsed) => state
            .oauth
            .complete(parsed, params, verifier)
            .await
            .map(|model| (parsed, model)),
        Err(error) => Err(error),
    };

    match result {
        Ok((provider, model)) => {
            info!(%provider, user_id = %model.user_id, "OAuth callback completed");
            let location = app_redirect(
                &state.config.app_base_url,
                &[("connected", provider.as_str())],
            )?;
            Ok((jar, found(&location)).into_response())
        }
        Err(error) => {
            warn!(provider = %provider, error = %error, "OAuth callback failed");
            if wants_json(&headers) {
                return Ok((jar, ApiError::from(error)).into_response());
            }
            let provider = provider
                .parse::<Provider>()
                .map(|p| p.as_str())
                .unwrap_or("unknown");
            let location = app_redirect(
                &state.config.app_base_url,
                &[("provider", provider), ("error", error.redirect_code())],
            )?;
            Ok((jar, found(&location)).into_response())
        }
    }
}
