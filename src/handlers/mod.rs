//! HTTP request handlers for the Quotaroute API

use crate::config::{Config, SecretSource};
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::models::HealthReporter;
use crate::router::ModelRouter;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod balance;
pub mod chat;
pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    router: Arc<ModelRouter>,
    reporter: Arc<HealthReporter>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build the router, adapters and reporter from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if metrics registration fails or an adapter cannot be
    /// constructed (e.g. its HTTP client fails to build).
    pub fn new(config: Arc<Config>, secrets: &dyn SecretSource) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);
        let router = ModelRouter::from_config(&config, secrets, Arc::clone(&metrics))?;
        let reporter = HealthReporter::new(Arc::clone(router.health()), &config, secrets)?;

        Ok(Self::from_parts(config, router, reporter))
    }

    /// Assemble state from pre-built parts (tests inject scripted adapters this way)
    pub fn from_parts(config: Arc<Config>, router: ModelRouter, reporter: HealthReporter) -> Self {
        let metrics = Arc::clone(router.metrics());
        Self {
            config,
            router: Arc::new(router),
            reporter: Arc::new(reporter),
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn reporter(&self) -> &HealthReporter {
        &self.reporter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build the HTTP application with every route and layer attached
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/providers/{name}/balance", get(balance::handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
