//! Subscription diagnosis and forced teardown through the diagnostics routes.

mod test_utils;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use linktrail::providers::Provider;
use linktrail::server::{AppState, create_app};
use serde_json::{Value, json};
use test_utils::{
    PUBLIC_BASE_URL, bearer, build_state, seed_integration, send, test_config, wait_for_audit,
};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn subscription(id: &str, callback_url: &str) -> Value {
    json!({
        "uri": format!("https://api.calendly.com/webhook_subscriptions/{id}"),
        "callback_url": callback_url,
        "state": "active",
        "scope": "user",
        "events": ["invitee.created"]
    })
}

fn own_callback(user: Uuid) -> String {
    format!("{PUBLIC_BASE_URL}/webhooks/calendly/user/{user}")
}

async fn mount_listing(server: &MockServer, collection: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/webhook_subscriptions"))
        .and(query_param("organization", "https://api.calendly.com/organizations/ORG1"))
        .and(query_param("scope", "user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collection": collection,
            "pagination": { "next_page": null }
        })))
        .mount(server)
        .await;
}

async fn call(state: &AppState, verb: &str, uri: &str, user: Uuid) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(verb)
        .uri(uri)
        .header("Authorization", bearer(user))
        .body(Body::empty())
        .unwrap();
    send(create_app(state.clone()), request).await
}

async fn seed_calendly(state: &AppState, user: Uuid, webhook_id: Option<&str>) {
    seed_integration(
        state,
        user,
        Provider::Calendly,
        "calendly-access",
        Some("calendly-refresh"),
        Some(Utc::now() + Duration::hours(1)),
    )
    .await;
    state
        .integrations
        .set_webhook_id(user, Provider::Calendly, webhook_id.map(str::to_string))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_diagnose_reconciles_stale_webhook_id() {
    let server = MockServer::start().await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_calendly(
        &state,
        user,
        Some("https://api.calendly.com/webhook_subscriptions/GONE"),
    )
    .await;
    mount_listing(
        &server,
        vec![
            subscription("OTHER", "https://elsewhere.test/hook"),
            subscription("CURRENT", &own_callback(user)),
        ],
    )
    .await;

    let (status, body) = call(&state, "GET", "/user/diagnose-calendly", user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expected_callback_url"], own_callback(user));
    assert_eq!(body["stored_webhook_found"], false);
    assert_eq!(
        body["callback_match"],
        "https://api.calendly.com/webhook_subscriptions/CURRENT"
    );
    assert_eq!(body["reconciled"], true);
    assert_eq!(body["subscriptions"].as_array().unwrap().len(), 2);

    let row = state
        .integrations
        .find(user, Provider::Calendly)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        row.webhook_id.as_deref(),
        Some("https://api.calendly.com/webhook_subscriptions/CURRENT")
    );

    // A second diagnosis finds nothing to fix.
    let (_, body) = call(&state, "GET", "/user/diagnose-calendly", user).await;
    assert_eq!(body["stored_webhook_found"], true);
    assert_eq!(body["reconciled"], false);
}

#[tokio::test]
async fn test_diagnose_without_matching_subscription() {
    let server = MockServer::start().await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_calendly(&state, user, None).await;
    mount_listing(&server, vec![]).await;

    let (status, body) = call(&state, "GET", "/user/diagnose-calendly", user).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["callback_match"].is_null());
    assert_eq!(body["reconciled"], false);
}

#[tokio::test]
async fn test_diagnose_provider_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webhook_subscriptions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_calendly(&state, user, None).await;

    let (status, body) = call(&state, "GET", "/user/diagnose-calendly", user).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "PROVIDER_ERROR");
}

#[tokio::test]
async fn test_force_delete_removes_everything_when_all_deletions_succeed() {
    let server = MockServer::start().await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_calendly(&state, user, None).await;
    mount_listing(
        &server,
        vec![
            subscription("A", &own_callback(user)),
            subscription("B", "https://elsewhere.test/hook"),
        ],
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path("/webhook_subscriptions/A"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    // Already gone upstream counts as deleted.
    Mock::given(method("DELETE"))
        .and(path("/webhook_subscriptions/B"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (status, body) = call(&state, "DELETE", "/user/diagnose-calendly", user).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["attempted"], 2);
    assert_eq!(body["deleted"].as_array().unwrap().len(), 2);
    assert_eq!(body["integration_deleted"], true);

    assert!(
        state
            .integrations
            .find(user, Provider::Calendly)
            .await
            .unwrap()
            .is_none()
    );
    assert!(wait_for_audit(&state, user, "force_disconnect").await);
}

#[tokio::test]
async fn test_force_delete_keeps_integration_on_partial_failure() {
    let server = MockServer::start().await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_calendly(&state, user, None).await;
    mount_listing(
        &server,
        vec![
            subscription("A", &own_callback(user)),
            subscription("B", "https://elsewhere.test/hook"),
        ],
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path("/webhook_subscriptions/A"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/webhook_subscriptions/B"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (status, body) = call(&state, "DELETE", "/user/diagnose-calendly", user).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "WEBHOOK_CLEANUP_FAILED");
    assert_eq!(body["details"]["attempted"], 2);
    assert_eq!(body["details"]["failures"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["details"]["failures"][0]["uri"],
        "https://api.calendly.com/webhook_subscriptions/B"
    );
    assert_eq!(body["details"]["integration_deleted"], false);

    assert!(
        state
            .integrations
            .find_connected(user, Provider::Calendly)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_force_delete_youtube_removes_row() {
    let server = MockServer::start().await;
    let state = build_state(test_config(&server.uri())).await;
    let user = Uuid::new_v4();
    seed_integration(&state, user, Provider::Youtube, "yt", None, None).await;

    let (status, body) = call(&state, "DELETE", "/user/diagnose-youtube", user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempted"], 0);
    assert_eq!(body["integration_deleted"], true);

    let (status, _) = call(&state, "GET", "/user/diagnose-youtube", user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
