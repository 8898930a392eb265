//! Failover execution for routed completions
//!
//! [`ModelRouter::execute`] runs one logical request:
//! 1. select viable candidates for the intent (computed once, never refreshed)
//! 2. call each candidate's adapter strictly in order, one live call each
//! 3. stop at the first success; on failure classify, update health, move on
//! 4. if nothing succeeds, return a single aggregated error
//!
//! Lower-priority quota is only spent after every higher-priority candidate
//! has already failed.

use crate::config::{Config, SecretSource};
use crate::error::{AppError, AppResult, AttemptFailure};
use crate::metrics::{AttemptOutcome, Metrics, RequestOutcome};
use crate::models::{Candidate, ModelSelector, ProviderHealth};
use crate::providers::{
    self, AdapterMap, CompletionRequest, CompletionResult, ProviderAdapter, ProviderError,
    ProviderErrorKind,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where and how a completion was served
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMeta {
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    pub intent: String,
}

/// A completion annotated with its routing metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedCompletion {
    #[serde(flatten)]
    pub result: CompletionResult,
    pub meta: RouteMeta,
}

/// Intent-driven router with sequential failover
pub struct ModelRouter {
    selector: ModelSelector,
    adapters: AdapterMap,
    metrics: Arc<Metrics>,
}

impl ModelRouter {
    pub fn new(selector: ModelSelector, adapters: AdapterMap, metrics: Arc<Metrics>) -> Self {
        Self {
            selector,
            adapters,
            metrics,
        }
    }

    /// Register every credentialed provider and build its adapter
    ///
    /// Providers whose secret is missing are left unregistered, which keeps
    /// them out of every selection.
    pub fn from_config(
        config: &Config,
        secrets: &dyn SecretSource,
        metrics: Arc<Metrics>,
    ) -> AppResult<Self> {
        let health = Arc::new(ProviderHealth::new());
        let timeout = Duration::from_secs(config.timeouts.request_seconds);
        let mut adapters = AdapterMap::new();

        for provider in &config.providers {
            let credentials = provider.credentials(secrets);
            if credentials.is_empty() {
                tracing::info!(
                    provider = %provider.name(),
                    secret_env = %provider.secret_env(),
                    "No credential found, provider disabled"
                );
                continue;
            }

            health.register(provider, credentials.len());
            let adapter = providers::build_adapter(provider, credentials, timeout)?;
            adapters.insert(provider.name().to_string(), adapter);
        }

        tracing::info!(
            registered = adapters.len(),
            configured = config.providers.len(),
            intents = config.intents.len(),
            "Model router initialized"
        );

        let selector = ModelSelector::new(Arc::new(config.intents.clone()), health);
        Ok(Self::new(selector, adapters, metrics))
    }

    pub fn health(&self) -> &Arc<ProviderHealth> {
        self.selector.health()
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn adapters(&self) -> &AdapterMap {
        &self.adapters
    }

    pub fn adapter(&self, provider: &str) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Serve `request` for `intent`, failing over across candidates
    ///
    /// # Errors
    /// - `UnknownIntent` if the intent is not configured
    /// - `NoViableCandidate` if no candidate could be attempted
    /// - `AggregateFailure` if every attempted candidate failed
    pub async fn execute(
        &self,
        intent: &str,
        request: CompletionRequest,
    ) -> AppResult<RoutedCompletion> {
        let candidates = self.selector.select(intent)?;
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for (position, candidate) in candidates.iter().enumerate() {
            let Some(adapter) = self.adapters.get(&candidate.provider) else {
                tracing::warn!(
                    intent = %intent,
                    provider = %candidate.provider,
                    "No adapter registered for candidate provider, skipping"
                );
                continue;
            };

            let call = CompletionRequest {
                intent: intent.to_string(),
                ..request.for_model(&candidate.model)
            };
            let started = Instant::now();

            match adapter.complete(&call).await {
                Ok(result) => {
                    let latency = started.elapsed();
                    self.record_success(candidate, latency);
                    self.record_request(intent, RequestOutcome::Success);

                    if !failures.is_empty() {
                        tracing::info!(
                            intent = %intent,
                            provider = %candidate.provider,
                            model = %candidate.model,
                            failed_before = failures.len(),
                            "Request succeeded after failover"
                        );
                    }
                    tracing::debug!(
                        intent = %intent,
                        provider = %candidate.provider,
                        model = %candidate.model,
                        position,
                        latency_ms = latency.as_millis() as u64,
                        input_tokens = result.usage.input_tokens,
                        output_tokens = result.usage.output_tokens,
                        "Completion served"
                    );

                    return Ok(RoutedCompletion {
                        result,
                        meta: RouteMeta {
                            provider: candidate.provider.clone(),
                            model: candidate.model.clone(),
                            latency_ms: latency.as_millis() as u64,
                            intent: intent.to_string(),
                        },
                    });
                }
                Err(err) => {
                    self.record_failure(candidate, &err);
                    tracing::warn!(
                        intent = %intent,
                        provider = %candidate.provider,
                        model = %candidate.model,
                        position,
                        kind = err.kind.as_str(),
                        error = %err.message,
                        "Candidate failed, trying next"
                    );
                    failures.push(AttemptFailure {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        reason: format!("{}: {}", err.kind, err.message),
                    });
                }
            }
        }

        if failures.is_empty() {
            tracing::error!(
                intent = %intent,
                "No viable candidate for intent"
            );
            self.record_request(intent, RequestOutcome::NoCandidate);
            return Err(AppError::NoViableCandidate {
                intent: intent.to_string(),
            });
        }

        tracing::error!(
            intent = %intent,
            attempts = failures.len(),
            "All candidates failed"
        );
        self.record_request(intent, RequestOutcome::Exhausted);
        Err(AppError::AggregateFailure {
            intent: intent.to_string(),
            attempts: failures,
        })
    }

    fn record_success(&self, candidate: &Candidate, latency: Duration) {
        self.health().on_success(&candidate.provider);

        let latency_ms = latency.as_secs_f64() * 1000.0;
        if let Err(e) = self
            .metrics
            .record_completion_duration(&candidate.provider, latency_ms)
        {
            tracing::error!(error = %e, "Metrics recording failed (non-fatal)");
        }
        self.record_attempt(&candidate.provider, AttemptOutcome::Success);
    }

    /// Dispatch a classified failure to the matching health mutator
    fn record_failure(&self, candidate: &Candidate, err: &ProviderError) {
        let health = self.health();
        match err.kind {
            ProviderErrorKind::RateLimited { retry_after_ms } => {
                health.on_429(&candidate.provider, retry_after_ms)
            }
            ProviderErrorKind::Overloaded => health.on_503(&candidate.provider),
            ProviderErrorKind::Fatal => health.on_fatal(&candidate.provider),
            ProviderErrorKind::Generic => health.on_error(&candidate.provider),
        }
        self.record_attempt(&candidate.provider, AttemptOutcome::Failed(err.kind));
    }

    fn record_attempt(&self, provider: &str, outcome: AttemptOutcome) {
        if let Err(e) = self.metrics.record_attempt(provider, outcome) {
            tracing::error!(
                provider = %provider,
                error = %e,
                "Metrics recording failed (non-fatal)"
            );
        }
    }

    fn record_request(&self, intent: &str, outcome: RequestOutcome) {
        if let Err(e) = self.metrics.record_request(intent, outcome) {
            tracing::error!(
                intent = %intent,
                error = %e,
                "Metrics recording failed (non-fatal)"
            );
        }
    }
}
