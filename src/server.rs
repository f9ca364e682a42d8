//! # Server Configuration
//!
//! Builds the shared [`AppState`], the Axum router and the serve loop for the integration
//! service, including the background token refresher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::attribution::AttributionEngine;
use crate::audit::AuditLogger;
use crate::auth::{JwtVerifier, auth_middleware, session_auth_middleware};
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::oauth::OAuthController;
use crate::providers::calendly::{CalendlyClient, CalendlySettings};
use crate::providers::youtube::{YoutubeClient, YoutubeSettings};
use crate::repositories::{
    AuditLogRepository, CallRepository, IntegrationRepository, LinkRepository,
    OAuthStateRepository, VideoCacheRepository, WebhookStatusRepository,
};
use crate::telemetry::trace_context_middleware;
use crate::token_manager::{TokenManager, TokenManagers};
use crate::token_refresh::TokenRefreshService;
use crate::video_cache::VideoCacheService;
use crate::webhook_subscriptions::WebhookSubscriptionManager;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jwt: Arc<JwtVerifier>,
    pub integrations: IntegrationRepository,
    pub audit: AuditLogger,
    pub tokens: TokenManagers,
    pub oauth: OAuthController,
    pub subscriptions: WebhookSubscriptionManager,
    pub attribution: AttributionEngine,
    pub videos: VideoCacheService,
    pub refresher: TokenRefreshService,
}

impl AppState {
    /// Wires repositories, provider clients and services from configuration.
    pub fn build(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let crypto_key = config
            .crypto_key
            .clone()
            .context("LINKTRAIL_CRYPTO_KEY is required")
            .and_then(|bytes| CryptoKey::new(bytes).context("invalid LINKTRAIL_CRYPTO_KEY"))?;

        let calendly = Arc::new(
            CalendlyClient::new(CalendlySettings {
                client_id: config.calendly_client_id.clone().unwrap_or_default(),
                client_secret: config.calendly_client_secret.clone().unwrap_or_default(),
                webhook_signing_key: config.calendly_webhook_signing_key.clone(),
                auth_base: config.calendly_auth_base.clone(),
                api_base: config.calendly_api_base.clone(),
                token_timeout: Duration::from_millis(config.provider_token_timeout_ms),
                webhook_timeout: Duration::from_millis(config.provider_webhook_timeout_ms),
            })
            .context("failed to build Calendly client")?,
        );
        let youtube = Arc::new(
            YoutubeClient::new(YoutubeSettings {
                client_id: config.youtube_client_id.clone().unwrap_or_default(),
                client_secret: config.youtube_client_secret.clone().unwrap_or_default(),
                auth_url: config.google_auth_url.clone(),
                token_base: config.google_token_base.clone(),
                api_base: config.youtube_api_base.clone(),
                timeout: Duration::from_millis(config.provider_token_timeout_ms),
            })
            .context("failed to build YouTube client")?,
        );

        let shared_db = Arc::new(db.clone());
        let integrations = IntegrationRepository::new(shared_db.clone(), crypto_key);
        let oauth_states = OAuthStateRepository::new(shared_db.clone());
        let statuses = WebhookStatusRepository::new(shared_db.clone());
        let audit = AuditLogger::new(AuditLogRepository::new(shared_db.clone()));

        let skew = chrono::Duration::seconds(config.token_refresh.skew_seconds as i64);
        let tokens = TokenManagers {
            calendly: TokenManager::new(calendly.clone(), integrations.clone(), audit.clone(), skew),
            youtube: TokenManager::new(youtube.clone(), integrations.clone(), audit.clone(), skew),
        };

        let subscriptions = WebhookSubscriptionManager::new(
            calendly.clone(),
            integrations.clone(),
            statuses.clone(),
            config.public_base_url.clone(),
        );
        let oauth = OAuthController::new(
            calendly,
            youtube.clone(),
            integrations.clone(),
            oauth_states.clone(),
            subscriptions.clone(),
            tokens.clone(),
            audit.clone(),
            config.public_base_url.clone(),
            config.oauth_state_ttl_minutes,
        );
        let attribution = AttributionEngine::new(
            integrations.clone(),
            LinkRepository::new(shared_db.clone()),
            CallRepository::new(shared_db.clone()),
            statuses,
            config.calendly_webhook_signing_key.clone(),
            config.webhook_tolerance_seconds,
        );
        let videos = VideoCacheService::new(
            youtube,
            tokens.youtube.clone(),
            integrations.clone(),
            VideoCacheRepository::new(shared_db),
        );
        let refresher = TokenRefreshService::new(
            config.token_refresh.clone(),
            integrations.clone(),
            oauth_states,
            tokens.clone(),
        );

        Ok(Self {
            jwt: Arc::new(JwtVerifier::from_config(&config)),
            config: Arc::new(config),
            db,
            integrations,
            audit,
            tokens,
            oauth,
            subscriptions,
            attribution,
            videos,
            refresher,
        })
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    match HeaderValue::from_str(config.app_base_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(error) => {
            warn!(error = %error, "APP_BASE_URL is not a valid origin; CORS disabled");
            layer
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let webhook_limit = state.config.webhook_max_body_kb * 1024;

    let api = Router::new()
        .route(
            "/integrations",
            get(handlers::integrations::list_integrations)
                .delete(handlers::integrations::disconnect_integration),
        )
        .route(
            "/integrations/connect",
            post(handlers::integrations::connect_integration),
        )
        .route(
            "/user/diagnose-calendly",
            get(handlers::diagnostics::diagnose_calendly)
                .delete(handlers::diagnostics::force_delete_calendly),
        )
        .route(
            "/user/diagnose-youtube",
            get(handlers::diagnostics::diagnose_youtube)
                .delete(handlers::diagnostics::force_delete_youtube),
        )
        .route("/user/{provider}/videos", get(handlers::videos::list_videos))
        .route("/video-details", get(handlers::videos::video_details))
        .route_layer(middleware::from_fn_with_state(
            state.jwt.clone(),
            auth_middleware,
        ));

    let browser = Router::new()
        .route("/oauth/{provider}/start", get(handlers::oauth::start_oauth))
        .route_layer(middleware::from_fn_with_state(
            state.jwt.clone(),
            session_auth_middleware,
        ));

    let webhooks = Router::new()
        .route("/webhooks/{provider}", post(handlers::webhooks::ingest_webhook))
        .route(
            "/webhooks/{provider}/user/{user_id}",
            post(handlers::webhooks::ingest_user_webhook),
        )
        .layer(DefaultBodyLimit::max(webhook_limit));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/oauth/{provider}/callback",
            get(handlers::oauth::oauth_callback),
        )
        .merge(api)
        .merge(browser)
        .merge(webhooks)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;
    let profile = config.profile.clone();

    let state = AppState::build(config, db)?;
    let shutdown = CancellationToken::new();

    let refresher = if state.config.token_refresh.enabled {
        let service = state.refresher.clone();
        let token = shutdown.child_token();
        Some(tokio::spawn(async move { service.run(token).await }))
    } else {
        info!("Background token refresh disabled");
        None
    };

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(handle) = refresher
        && let Err(error) = handle.await
    {
        warn!(error = %error, "Token refresher task ended abnormally");
    }

    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::oauth::start_oauth,
        crate::handlers::oauth::oauth_callback,
        crate::handlers::integrations::connect_integration,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::disconnect_integration,
        crate::handlers::diagnostics::diagnose_calendly,
        crate::handlers::diagnostics::force_delete_calendly,
        crate::handlers::diagnostics::diagnose_youtube,
        crate::handlers::diagnostics::force_delete_youtube,
        crate::handlers::videos::list_videos,
        crate::handlers::videos::video_details,
        crate::handlers::webhooks::ingest_webhook,
        crate::handlers::webhooks::ingest_user_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::providers::Provider,
            crate::oauth::RemoteCleanup,
            crate::handlers::HealthResponse,
            crate::handlers::oauth::AuthorizeUrlResponse,
            crate::handlers::integrations::ConnectRequest,
            crate::handlers::integrations::IntegrationView,
            crate::handlers::integrations::IntegrationListResponse,
            crate::handlers::integrations::DisconnectResponse,
            crate::handlers::webhooks::WebhookAck,
            crate::webhook_subscriptions::SubscriptionDiagnosis,
            crate::webhook_subscriptions::DeletionReport,
            crate::webhook_subscriptions::DeletionFailure,
            crate::providers::calendly::WebhookSubscription,
            crate::providers::youtube::VideoSummary,
            crate::video_cache::VideoRecord,
            crate::video_cache::VideoDetailResponse,
            crate::video_cache::VideoListResponse,
        )
    ),
    modifiers(&BearerAuthAddon),
    tags(
        (name = "root", description = "Service information"),
        (name = "oauth", description = "Browser OAuth handshake"),
        (name = "integrations", description = "Connection lifecycle"),
        (name = "diagnostics", description = "Webhook subscription diagnostics"),
        (name = "videos", description = "YouTube video cache"),
        (name = "webhooks", description = "Inbound provider webhooks"),
    ),
    info(
        title = "Linktrail Integrations API",
        description = "OAuth integrations, webhook attribution and video caching",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
