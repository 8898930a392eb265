//! Error types for Quotaroute
//!
//! Caller-visible errors implement `IntoResponse` for Axum handlers. Per-provider
//! failures are classified separately in [`crate::providers::ProviderError`] and
//! never reach callers raw; they surface only inside [`AppError::AggregateFailure`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// One failed candidate attempt, recorded during failover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider: String,
    pub model: String,
    /// Truncated reason reported by the adapter
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.provider, self.model, self.reason)
    }
}

fn join_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unknown intent '{0}': no preference list configured")]
    UnknownIntent(String),

    #[error("No viable candidate for intent '{intent}': every configured provider is unavailable")]
    NoViableCandidate { intent: String },

    #[error(
        "all candidates failed for intent '{intent}': {}",
        join_attempts(.attempts)
    )]
    AggregateFailure {
        intent: String,
        attempts: Vec<AttemptFailure>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) | Self::UnknownIntent(_) => StatusCode::BAD_REQUEST,
            Self::NoViableCandidate { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::AggregateFailure { .. } => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
