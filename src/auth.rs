//! # Authentication
//!
//! Resolves the caller of a protected endpoint to an internal `user_id`. Callers present an
//! HS256 JWT issued by the identity provider; its `sub` claim is the user's UUID.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, IntegrationError};
use crate::server::AppState;

/// The resolved caller of a protected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

/// Claims read from the bearer JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies end-user JWTs against the configured secret and audience.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    session_cookie: String,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("key", &"[REDACTED]")
            .field("session_cookie", &self.session_cookie)
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: Option<&str>, session_cookie: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            session_cookie: session_cookie.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.auth_jwt_secret.as_deref().unwrap_or_default(),
            config.auth_jwt_audience.as_deref(),
            &config.auth_session_cookie,
        )
    }

    /// Decodes and validates `token`, returning the user it was issued to.
    pub fn verify(&self, token: &str) -> Result<Uuid, ApiError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            unauthenticated("Invalid or expired token")
        })?;

        data.claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| unauthenticated("Token subject is not a valid user id"))
    }

    /// Reads the bearer header, and when `allow_cookie` is set falls back to the session
    /// cookie.
    pub fn resolve_user(&self, headers: &HeaderMap, allow_cookie: bool) -> Result<Uuid, ApiError> {
        if let Some(token) = extract_bearer_token(headers)? {
            return self.verify(token);
        }

        if allow_cookie
            && let Some(cookie) = CookieJar::from_headers(headers).get(&self.session_cookie)
        {
            return self.verify(cookie.value());
        }

        Err(unauthenticated("Missing Authorization header"))
    }
}

fn unauthenticated(reason: &'static str) -> ApiError {
    IntegrationError::Unauthenticated(reason).into()
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.jwt)
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let header = value
        .to_str()
        .map_err(|_| unauthenticated("Invalid Authorization header"))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Some)
        .ok_or_else(|| unauthenticated("Authorization header must use Bearer scheme"))
}

async fn authenticate(
    verifier: &JwtVerifier,
    mut request: Request,
    next: Next,
    allow_cookie: bool,
) -> Result<Response, ApiError> {
    let user_id = verifier.resolve_user(request.headers(), allow_cookie)?;
    tracing::debug!(%user_id, "Authenticated request");

    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}

/// Authentication middleware for API routes: bearer token only.
pub async fn auth_middleware(
    State(verifier): State<Arc<JwtVerifier>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&verifier, request, next, false).await
}

/// Authentication middleware for browser navigations: bearer token or session cookie.
pub async fn session_auth_middleware(
    State(verifier): State<Arc<JwtVerifier>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authenticate(&verifier, request, next, true).await
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or_else(|| unauthenticated("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;

    const SECRET: &str = "test-jwt-secret";

    fn token_for(sub: &str, exp_offset: i64, aud: Option<&str>) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            aud: aud.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn run_middleware(
        verifier: JwtVerifier,
        allow_cookie: bool,
        request: Request<Body>,
    ) -> (StatusCode, String) {
        async fn handler(AuthenticatedUser(user_id): AuthenticatedUser) -> String {
            user_id.to_string()
        }

        let verifier = Arc::new(verifier);
        let router = Router::new().route("/test", get(handler));
        let router = if allow_cookie {
            router.layer(axum::middleware::from_fn_with_state(
                verifier,
                session_auth_middleware,
            ))
        } else {
            router.layer(axum::middleware::from_fn_with_state(verifier, auth_middleware))
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(SECRET, None, "linktrail_session")
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let (status, body) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("UNAUTHENTICATED"));
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dGVzdDoxMjM=")
            .body(Body::empty())
            .unwrap();

        let (status, _) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let user_id = Uuid::new_v4();
        let request = Request::builder()
            .uri("/test")
            .header(
                "Authorization",
                format!("Bearer {}", token_for(&user_id.to_string(), 600, None)),
            )
            .body(Body::empty())
            .unwrap();

        let (status, body) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, user_id.to_string());
    }

    #[tokio::test]
    async fn expired_or_foreign_tokens_rejected() {
        let user_id = Uuid::new_v4().to_string();
        let expired = token_for(&user_id, -3600, None);
        let not_uuid = token_for("alice", 600, None);
        let forged = encode(
            &Header::default(),
            &Claims {
                sub: user_id.clone(),
                exp: (chrono::Utc::now().timestamp() + 600) as u64,
                aud: None,
            },
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        for token in [expired, not_uuid, forged] {
            let request = Request::builder()
                .uri("/test")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            let (status, _) = run_middleware(verifier(), false, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn audience_enforced_when_configured() {
        let user_id = Uuid::new_v4().to_string();
        let verifier = || JwtVerifier::new(SECRET, Some("linktrail"), "linktrail_session");

        let request = Request::builder()
            .uri("/test")
            .header(
                "Authorization",
                format!("Bearer {}", token_for(&user_id, 600, Some("other"))),
            )
            .body(Body::empty())
            .unwrap();
        let (status, _) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/test")
            .header(
                "Authorization",
                format!("Bearer {}", token_for(&user_id, 600, Some("linktrail"))),
            )
            .body(Body::empty())
            .unwrap();
        let (status, _) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn session_cookie_only_accepted_by_session_middleware() {
        let user_id = Uuid::new_v4();
        let cookie = format!(
            "linktrail_session={}",
            token_for(&user_id.to_string(), 600, None)
        );

        let request = Request::builder()
            .uri("/test")
            .header("Cookie", cookie.clone())
            .body(Body::empty())
            .unwrap();
        let (status, _) = run_middleware(verifier(), false, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/test")
            .header("Cookie", cookie)
            .body(Body::empty())
            .unwrap();
        let (status, body) = run_middleware(verifier(), true, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, user_id.to_string());
    }
}
