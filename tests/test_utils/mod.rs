//! Test utilities for integration tests.
//!
//! Builds an in-memory SQLite database with migrations applied and an [`AppState`] whose
//! provider clients point at a wiremock server.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use linktrail::auth::Claims;
use linktrail::config::{AppConfig, TokenRefreshConfig};
use linktrail::models::integration;
use linktrail::providers::Provider;
use linktrail::repositories::NewIntegration;
use linktrail::server::AppState;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const SIGNING_KEY: &str = "calendly-signing-key";
pub const PUBLIC_BASE_URL: &str = "https://api.linktrail.test";
pub const APP_BASE_URL: &str = "https://app.linktrail.test";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration with every provider endpoint rooted at `server_uri`.
pub fn test_config(server_uri: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        crypto_key: Some(vec![42u8; 32]),
        auth_jwt_secret: Some(JWT_SECRET.to_string()),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        app_base_url: APP_BASE_URL.to_string(),
        calendly_client_id: Some("calendly-client".to_string()),
        calendly_client_secret: Some("calendly-secret".to_string()),
        calendly_webhook_signing_key: Some(SIGNING_KEY.to_string()),
        calendly_auth_base: server_uri.to_string(),
        calendly_api_base: server_uri.to_string(),
        youtube_client_id: Some("youtube-client".to_string()),
        youtube_client_secret: Some("youtube-secret".to_string()),
        google_auth_url: format!("{server_uri}/o/oauth2/v2/auth"),
        google_token_base: server_uri.to_string(),
        youtube_api_base: server_uri.to_string(),
        token_refresh: TokenRefreshConfig {
            jitter_factor: 0.0,
            ..TokenRefreshConfig::default()
        },
        ..AppConfig::default()
    }
}

pub async fn build_state(config: AppConfig) -> AppState {
    let db = setup_test_db().await.expect("Failed to set up test database");
    AppState::build(config, db).expect("Failed to build app state")
}

pub fn mint_jwt(user_id: Uuid) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now().timestamp() + 600) as u64,
        aud: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}

pub fn bearer(user_id: Uuid) -> String {
    format!("Bearer {}", mint_jwt(user_id))
}

/// Seeds a connected integration with the given tokens and expiry.
pub async fn seed_integration(
    state: &AppState,
    user_id: Uuid,
    provider: Provider,
    access_token: &str,
    refresh_token: Option<&str>,
    token_expires_at: Option<DateTime<Utc>>,
) -> integration::Model {
    let (external_user_id, external_org_id) = match provider {
        Provider::Calendly => (
            Some("https://api.calendly.com/users/HOST1".to_string()),
            Some("https://api.calendly.com/organizations/ORG1".to_string()),
        ),
        Provider::Youtube => (Some("UC-channel".to_string()), None),
    };

    state
        .integrations
        .upsert_connected(NewIntegration {
            user_id,
            provider,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            token_expires_at,
            provider_identity: None,
            external_user_id,
            external_org_id,
            webhook_id: None,
        })
        .await
        .expect("Failed to seed integration")
}

/// Sends a request through the router and decodes the JSON body (or `Null`).
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("router call failed");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Polls the audit log until `action` shows up for `user_id`. Audit inserts are detached.
pub async fn wait_for_audit(state: &AppState, user_id: Uuid, action: &str) -> bool {
    let repo = linktrail::repositories::AuditLogRepository::new(std::sync::Arc::new(state.db.clone()));
    for _ in 0..50 {
        if let Ok(rows) = repo.list_for_user(user_id).await
            && rows.iter().any(|row| row.action == action)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
