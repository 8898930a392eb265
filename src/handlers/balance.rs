//! Provider balance endpoint
//!
//! GET /providers/{name}/balance answers from the reporter's cache, refreshing
//! it when stale. Upstream failures never surface as errors: the last known
//! value (or null) is returned instead.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

use crate::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub provider: String,
    pub balance: Option<f64>,
}

pub async fn handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<BalanceResponse>) {
    let reporter = state.reporter();
    if !reporter.has_balance_source(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(BalanceResponse {
                provider: name,
                balance: None,
            }),
        );
    }

    let balance = reporter.balance(&name).await;
    (
        StatusCode::OK,
        Json(BalanceResponse {
            provider: name,
            balance,
        }),
    )
}
