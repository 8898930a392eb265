//! Prometheus metrics collection for Quotaroute
//!
//! Tracks:
//! - Routed requests by intent and final outcome
//! - Individual provider attempts by provider and classified outcome
//! - Upstream completion latency by provider
//!
//! Exposed via the `/metrics` endpoint in Prometheus text format.

use crate::providers::ProviderErrorKind;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final outcome of one routed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    NoCandidate,
    Exhausted,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoCandidate => "no_candidate",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Outcome of a single provider attempt
///
/// Restricted label set keeps cardinality at 5 × provider count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(ProviderErrorKind),
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed(kind) => kind.as_str(),
        }
    }
}

/// Metrics collector for Quotaroute
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    provider_attempts: IntCounterVec,
    completion_duration: HistogramVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: intents × 3 outcomes (intents are bounded by config)
        let requests_total = IntCounterVec::new(
            Opts::new(
                "quotaroute_requests_total",
                "Total routed requests by intent and outcome",
            ),
            &["intent", "outcome"],
        )?;

        let provider_attempts = IntCounterVec::new(
            Opts::new(
                "quotaroute_provider_attempts_total",
                "Provider calls by provider and classified outcome",
            ),
            &["provider", "outcome"],
        )?;

        let completion_duration = HistogramVec::new(
            HistogramOpts::new(
                "quotaroute_completion_duration_ms",
                "Successful upstream completion latency in milliseconds",
            )
            .buckets(vec![
                100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
            ]),
            &["provider"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(provider_attempts.clone()))?;
        registry.register(Box::new(completion_duration.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            provider_attempts,
            completion_duration,
        })
    }

    /// Record the final outcome of a routed request
    pub fn record_request(
        &self,
        intent: &str,
        outcome: RequestOutcome,
    ) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[intent, outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record one provider attempt
    pub fn record_attempt(
        &self,
        provider: &str,
        outcome: AttemptOutcome,
    ) -> Result<(), prometheus::Error> {
        self.provider_attempts
            .get_metric_with_label_values(&[provider, outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record the latency of a successful completion
    ///
    /// # Errors
    ///
    /// Rejects NaN, infinite and negative durations, which would corrupt
    /// histogram percentiles.
    pub fn record_completion_duration(
        &self,
        provider: &str,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                duration_ms
            )));
        }

        self.completion_duration
            .get_metric_with_label_values(&[provider])?
            .observe(duration_ms);
        Ok(())
    }

    /// Current attempt count for a provider/outcome pair
    pub fn attempt_count(&self, provider: &str, outcome: AttemptOutcome) -> u64 {
        self.provider_attempts
            .get_metric_with_label_values(&[provider, outcome.as_str()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Current request count for an intent/outcome pair
    pub fn request_count(&self, intent: &str, outcome: RequestOutcome) -> u64 {
        self.requests_total
            .get_metric_with_label_values(&[intent, outcome.as_str()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Encode all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics output is not UTF-8: {}", e)))
    }
}
