//! Health check endpoint
//!
//! Reports the provider pool: one summary line per credentialed provider plus
//! the full per-provider status.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::models::reporter::ProviderStatus;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "OK" while at least one provider can take traffic, else "degraded"
    pub status: &'static str,
    pub summary: Vec<String>,
    pub providers: Vec<ProviderStatus>,
}

/// Health check handler
///
/// Always 200: a degraded pool is still a running service, and load
/// balancers should not pull it for an upstream outage.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let reporter = state.reporter();
    let providers = reporter.statuses();
    let status = if providers.iter().any(|p| p.available) {
        "OK"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            summary: reporter.summary(Some(state.router().adapters())),
            providers,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_health_handler_reports_pool() {
        let state = test_support::state();
        let (status, Json(body)) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(
            body.summary,
            vec!["gemini: daily 1500", "groq: daily unbounded (2 keys)"]
        );
        assert_eq!(body.providers.len(), 2);
    }

    #[tokio::test]
    async fn test_health_handler_degraded_when_everything_cools() {
        let state = test_support::state();
        state.router().health().on_fatal("gemini");
        state.router().health().on_503("groq");

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "degraded");
        assert!(body.providers.iter().all(|p| p.cooldown_remaining_ms.is_some()));
    }
}
