//! # Token Refresh Service
//!
//! Background task that periodically scans connected integrations and refreshes tokens
//! nearing expiry through the same [`TokenManager`](crate::token_manager::TokenManager)
//! used at request time. Each tick also purges expired OAuth handshake state.

use chrono::{Duration, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::TokenRefreshConfig;
use crate::error::IntegrationError;
use crate::models::integration;
use crate::providers::Provider;
use crate::repositories::{IntegrationRepository, OAuthStateRepository};
use crate::token_manager::TokenManagers;

/// Background token refresh service
#[derive(Clone)]
pub struct TokenRefreshService {
    config: TokenRefreshConfig,
    integrations: IntegrationRepository,
    oauth_states: OAuthStateRepository,
    managers: TokenManagers,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub integrations_polled: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub states_purged: u64,
}

impl TokenRefreshService {
    pub fn new(
        config: TokenRefreshConfig,
        integrations: IntegrationRepository,
        oauth_states: OAuthStateRepository,
        managers: TokenManagers,
    ) -> Self {
        Self {
            config,
            integrations,
            oauth_states,
            managers,
        }
    }

    /// Run the token refresh loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            concurrency = self.config.concurrency,
            "Starting token refresh service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Execute one tick: refresh everything inside the skew window, then purge stale state.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<RefreshStats, IntegrationError> {
        let mut stats = RefreshStats::default();
        let threshold = Utc::now() + Duration::seconds(self.config.skew_seconds as i64);
        let due = self.integrations.due_for_refresh(threshold).await?;
        stats.integrations_polled = due.len() as u64;

        debug!(
            found = due.len(),
            skew_seconds = self.config.skew_seconds,
            "Found integrations due for token refresh"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1) as usize));
        let mut handles = Vec::with_capacity(due.len());

        for model in due {
            let semaphore = semaphore.clone();
            let service = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    IntegrationError::InvalidRequest("refresh semaphore closed".to_string())
                })?;
                service.refresh_with_jitter(model).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => stats.refreshes_succeeded += 1,
                Ok(Err(e)) => {
                    stats.refreshes_failed += 1;
                    warn!(error = %e, "Integration refresh failed");
                }
                Err(e) => {
                    stats.refreshes_failed += 1;
                    error!(error = ?e, "Refresh task panicked or was cancelled");
                }
            }
        }

        match self.oauth_states.purge_expired().await {
            Ok(purged) => stats.states_purged = purged,
            Err(e) => warn!(error = %e, "Failed to purge expired oauth states"),
        }

        gauge!("token_refresh_integrations_polled_gauge").set(stats.integrations_polled as f64);
        counter!("token_refresh_background_success_total").increment(stats.refreshes_succeeded);
        counter!("token_refresh_background_failure_total").increment(stats.refreshes_failed);

        info!(
            integrations_polled = stats.integrations_polled,
            refreshes_succeeded = stats.refreshes_succeeded,
            refreshes_failed = stats.refreshes_failed,
            states_purged = stats.states_purged,
            "Token refresh tick completed"
        );

        Ok(stats)
    }

    async fn refresh_with_jitter(&self, model: integration::Model) -> Result<(), IntegrationError> {
        let jitter_seconds = self.compute_jitter();
        if jitter_seconds > 0 {
            debug!(
                integration_id = %model.id,
                jitter_seconds,
                "Applying jitter before token refresh"
            );
            sleep(TokioDuration::from_secs(jitter_seconds)).await;
        }

        self.refresh_integration(&model).await
    }

    /// Refreshes one row found by a tick. Goes through the request-time path so a row
    /// refreshed since it was loaded is re-read and left alone.
    #[instrument(skip_all, fields(integration_id = %model.id, provider = %model.provider))]
    pub async fn refresh_integration(&self, model: &integration::Model) -> Result<(), IntegrationError> {
        let provider: Provider = model
            .provider
            .parse()
            .map_err(|_| IntegrationError::UnsupportedProvider(model.provider.clone()))?;

        let started = std::time::Instant::now();
        self.managers
            .get(provider)
            .get_valid_access_token(model.user_id)
            .await?;
        histogram!("token_refresh_latency_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        Ok(())
    }

    /// Random delay in `[0, skew * jitter_factor]` seconds.
    fn compute_jitter(&self) -> u64 {
        if self.config.jitter_factor <= 0.0 {
            return 0;
        }

        let max_delay_seconds = (self.config.skew_seconds as f64 * self.config.jitter_factor) as u64;

        let mut rng = rand::thread_rng();
        rng.gen_range(0..=max_delay_seconds)
    }
}
