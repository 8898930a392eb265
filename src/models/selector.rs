//! Candidate selection for an intent
//!
//! Filters an intent's static preference list through [`ProviderHealth`].
//! Health gates availability but never re-orders: the surviving candidates
//! keep exactly the order they were configured in.

use crate::error::{AppError, AppResult};
use crate::models::health::ProviderHealth;
use crate::models::intent::{Candidate, IntentMatrix};
use std::sync::Arc;

/// Selects viable (provider, model) candidates for an intent
#[derive(Debug, Clone)]
pub struct ModelSelector {
    intents: Arc<IntentMatrix>,
    health: Arc<ProviderHealth>,
}

impl ModelSelector {
    pub fn new(intents: Arc<IntentMatrix>, health: Arc<ProviderHealth>) -> Self {
        Self { intents, health }
    }

    /// Get a reference to the shared health registry
    pub fn health(&self) -> &Arc<ProviderHealth> {
        &self.health
    }

    pub fn intents(&self) -> &IntentMatrix {
        &self.intents
    }

    /// Viable candidates for `intent`, in configured priority order
    ///
    /// # Errors
    /// Returns `AppError::UnknownIntent` if the intent has no preference list.
    /// An intent whose candidates are all unavailable yields `Ok(vec![])`;
    /// deciding what that means is the caller's job.
    pub fn select(&self, intent: &str) -> AppResult<Vec<Candidate>> {
        let configured = self.intents.candidates(intent).ok_or_else(|| {
            tracing::error!(
                intent = %intent,
                "Intent has no preference list - check [intents] in config.toml"
            );
            AppError::UnknownIntent(intent.to_string())
        })?;

        let mut viable = Vec::with_capacity(configured.len());
        for candidate in configured {
            if !self
                .health
                .is_available(&candidate.provider, Some(&candidate.model))
            {
                tracing::debug!(
                    intent = %intent,
                    provider = %candidate.provider,
                    model = %candidate.model,
                    "Skipping unavailable candidate"
                );
                continue;
            }
            viable.push(candidate.clone());
        }

        tracing::debug!(
            intent = %intent,
            configured = configured.len(),
            viable = viable.len(),
            "Filtered intent candidates through provider health"
        );

        Ok(viable)
    }

    /// Health score for a candidate, for callers breaking ties themselves
    pub fn score(&self, candidate: &Candidate) -> f64 {
        self.health.score(&candidate.provider, Some(&candidate.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn provider(name: &str, daily_quota: &str) -> ProviderConfig {
        toml::from_str(&format!(
            r#"
name = "{name}"
kind = "openai"
base_url = "http://localhost/v1"
secret_env = "KEY"
daily_quota = {daily_quota}
"#
        ))
        .expect("should parse provider config")
    }

    fn selector_with(providers: &[(&str, usize)]) -> ModelSelector {
        let health = Arc::new(ProviderHealth::new());
        for (name, creds) in providers {
            health.register(&provider(name, "1000"), *creds);
        }
        let intents = IntentMatrix::new()
            .with_intent(
                "chat",
                vec![
                    Candidate::new("a", "a-model"),
                    Candidate::new("b", "b-model"),
                    Candidate::new("c", "c-model"),
                ],
            )
            .with_intent("empty-ish", vec![Candidate::new("unregistered", "m")]);
        ModelSelector::new(Arc::new(intents), health)
    }

    fn providers_of(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.provider.as_str()).collect()
    }

    #[test]
    fn test_all_available_keeps_full_order() {
        let selector = selector_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let picked = selector.select("chat").unwrap();
        assert_eq!(providers_of(&picked), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cooled_provider_dropped_order_preserved() {
        let selector = selector_with(&[("a", 1), ("b", 1), ("c", 1)]);
        selector.health().on_error("a");

        let picked = selector.select("chat").unwrap();
        assert_eq!(providers_of(&picked), vec!["b", "c"]);
    }

    #[test]
    fn test_uncredentialed_provider_dropped() {
        let selector = selector_with(&[("a", 0), ("b", 1), ("c", 1)]);
        let picked = selector.select("chat").unwrap();
        assert_eq!(providers_of(&picked), vec!["b", "c"]);
    }

    #[test]
    fn test_low_score_does_not_reorder() {
        let selector = selector_with(&[("a", 1), ("b", 1), ("c", 1)]);
        // Drag a's score down without making it unavailable
        for _ in 0..900 {
            selector.health().on_success("a");
        }
        let drained = selector.score(&Candidate::new("a", "a-model"));
        let fresh = selector.score(&Candidate::new("b", "b-model"));
        assert!(drained < fresh);

        let picked = selector.select("chat").unwrap();
        assert_eq!(providers_of(&picked), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_all_filtered_is_empty_not_error() {
        let selector = selector_with(&[]);
        assert!(selector.select("empty-ish").unwrap().is_empty());
        assert!(selector.select("chat").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_intent_fails_loudly() {
        let selector = selector_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let err = selector.select("poetry").unwrap_err();
        assert!(matches!(err, AppError::UnknownIntent(ref i) if i == "poetry"));
    }
}
