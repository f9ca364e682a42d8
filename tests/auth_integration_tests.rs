//! Authentication of API and browser routes.

mod test_utils;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use linktrail::auth::Claims;
use linktrail::config::AppConfig;
use linktrail::server::create_app;
use test_utils::{JWT_SECRET, bearer, build_state, mint_jwt, send, test_config};
use tower::ServiceExt;
use uuid::Uuid;

const UPSTREAM: &str = "http://127.0.0.1:9";

fn token(sub: &str, exp_offset: i64, aud: Option<&str>, secret: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: (Utc::now().timestamp() + exp_offset) as u64,
        aud: aud.map(str::to_string),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_rejects_bad_tokens() {
    let state = build_state(test_config(UPSTREAM)).await;
    let user = Uuid::new_v4().to_string();

    let cases = [
        format!("Bearer {}", token(&user, -600, None, JWT_SECRET)),
        format!("Bearer {}", token(&user, 600, None, "another-secret")),
        format!("Bearer {}", token("not-a-uuid", 600, None, JWT_SECRET)),
        "Bearer garbage".to_string(),
        format!("Basic {}", token(&user, 600, None, JWT_SECRET)),
    ];

    for authorization in cases {
        let request = Request::builder()
            .uri("/integrations")
            .header(header::AUTHORIZATION, authorization.clone())
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(create_app(state.clone()), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{authorization}");
        assert_eq!(body["error"], "UNAUTHENTICATED");
    }
}

#[tokio::test]
async fn test_audience_is_enforced_when_configured() {
    let config = AppConfig {
        auth_jwt_audience: Some("linktrail-api".to_string()),
        ..test_config(UPSTREAM)
    };
    let state = build_state(config).await;
    let user = Uuid::new_v4().to_string();

    for (aud, expected) in [
        (Some("linktrail-api"), StatusCode::OK),
        (Some("someone-else"), StatusCode::UNAUTHORIZED),
        (None, StatusCode::UNAUTHORIZED),
    ] {
        let request = Request::builder()
            .uri("/integrations")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", token(&user, 600, aud, JWT_SECRET)),
            )
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(create_app(state.clone()), request).await;
        assert_eq!(status, expected, "{aud:?}");
    }
}

#[tokio::test]
async fn test_session_cookie_only_authenticates_browser_routes() {
    let state = build_state(test_config(UPSTREAM)).await;
    let cookie = format!("linktrail_session={}", mint_jwt(Uuid::new_v4()));

    let request = Request::builder()
        .uri("/oauth/youtube/start")
        .header(header::COOKIE, cookie.clone())
        .body(Body::empty())
        .unwrap();
    let response = create_app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(&format!("{UPSTREAM}/o/oauth2/v2/auth")));

    let request = Request::builder()
        .uri("/integrations")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(create_app(state), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_routes_need_no_credentials() {
    let state = build_state(test_config(UPSTREAM)).await;
    for uri in ["/", "/healthz", "/openapi.json"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _) = send(create_app(state.clone()), request).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
    }

    let request = Request::builder()
        .uri("/oauth/youtube/start")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(create_app(state.clone()), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/integrations")
        .header(header::AUTHORIZATION, bearer(Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(create_app(state), request).await;
    assert_eq!(status, StatusCode::OK);
}
