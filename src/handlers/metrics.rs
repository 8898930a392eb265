//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics collection fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP quotaroute_requests_total Total routed requests by intent and outcome
/// # TYPE quotaroute_requests_total counter
/// quotaroute_requests_total{intent="chat",outcome="success"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to gather metrics for Prometheus scraping"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use crate::metrics::{AttemptOutcome, RequestOutcome};
    use crate::providers::ProviderErrorKind;

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let state = test_support::state();
        state
            .metrics()
            .record_request("chat", RequestOutcome::Success)
            .unwrap();
        state
            .metrics()
            .record_attempt("gemini", AttemptOutcome::Failed(ProviderErrorKind::Overloaded))
            .unwrap();

        let (status, body) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# HELP"));
        assert!(body.contains("# TYPE"));
        assert!(body.contains(r#"quotaroute_requests_total{intent="chat",outcome="success"} 1"#));
        assert!(body.contains(
            r#"quotaroute_provider_attempts_total{outcome="overloaded",provider="gemini"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_concurrent_metrics_scraping() {
        let state = test_support::state();
        for _ in 0..50 {
            state
                .metrics()
                .record_request("chat", RequestOutcome::Exhausted)
                .unwrap();
        }

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { handler(State(state)).await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        let first = &results[0].as_ref().unwrap().1;
        for result in &results {
            let (status, body) = result.as_ref().unwrap();
            assert_eq!(*status, StatusCode::OK);
            assert_eq!(body, first);
        }
    }
}
