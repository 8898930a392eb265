//! Shared HTTP plumbing and error classification for provider adapters
//!
//! Every transport maps failures through the same table:
//!
//! | Condition                          | Kind          |
//! |------------------------------------|---------------|
//! | HTTP 429                           | RateLimited   |
//! | HTTP 503                           | Overloaded    |
//! | HTTP 401 / 402                     | Fatal         |
//! | any other status >= 400            | Generic       |
//! | transport error or timeout         | Generic       |

use super::{ProviderError, ProviderErrorKind};
use crate::error::{AppError, AppResult};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Build a pooled client that owns the per-call timeout
pub fn build_client(provider: &str, timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| {
            AppError::Internal(format!(
                "Failed to create HTTP client for {}: {}",
                provider, e
            ))
        })
}

/// Retry hint in milliseconds from `retry-after-ms` or `retry-after` (seconds)
///
/// HTTP-date forms of `retry-after` are ignored.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(ms) = header_number(headers, "retry-after-ms") {
        return Some(ms.round() as u64);
    }
    header_number(headers, "retry-after").map(|secs| (secs * 1000.0).round() as u64)
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Retry hint carried in a Google-style error body (`RetryInfo.retryDelay`)
pub fn retry_delay_from_body(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.pointer("/error/details")?
        .as_array()?
        .iter()
        .filter_map(|d| d.get("retryDelay")?.as_str())
        .find_map(parse_duration_secs)
}

/// Parse "30s" / "1.5s" into milliseconds
fn parse_duration_secs(raw: &str) -> Option<u64> {
    let secs: f64 = raw.trim().strip_suffix('s')?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as u64)
}

/// Classify a non-success HTTP response
pub fn classify_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let kind = match status.as_u16() {
        429 => ProviderErrorKind::RateLimited {
            retry_after_ms: retry_after_ms(headers).or_else(|| retry_delay_from_body(body)),
        },
        503 => ProviderErrorKind::Overloaded,
        401 | 402 => ProviderErrorKind::Fatal,
        _ => ProviderErrorKind::Generic,
    };

    let detail = body.trim();
    let message = if detail.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), detail)
    };

    ProviderError::new(provider, kind, message)
}

/// Classify a transport-level failure (connect, timeout, body read)
pub fn classify_transport(provider: &str, error: &reqwest::Error) -> ProviderError {
    let message = if error.is_timeout() {
        format!("request timed out: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        format!("transport error: {}", error)
    };
    ProviderError::generic(provider, message)
}

/// Send a prepared request and return the raw success body
///
/// Non-success statuses and transport failures come back classified.
pub async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<String, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(provider, &e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(provider, &e))?;

    if !status.is_success() {
        return Err(classify_status(provider, status, &headers, &body));
    }

    Ok(body)
}

/// Deserialize a success body, classifying parse failures as Generic
pub fn parse_body<T: serde::de::DeserializeOwned>(
    provider: &str,
    body: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::generic(provider, format!("unparsable response body: {}", e))
    })
}
