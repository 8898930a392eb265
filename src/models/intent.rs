//! Intent preference matrix
//!
//! Maps each intent category to a human-curated, ordered list of
//! (provider, model) candidates. Order encodes priority and is never
//! re-sorted at runtime.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A (provider, model) pair drawn from an intent's preference list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Candidate {
    pub provider: String,
    pub model: String,
}

impl Candidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Static intent → ordered candidates table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IntentMatrix(BTreeMap<String, Vec<Candidate>>);

impl IntentMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and embedders
    pub fn with_intent(mut self, intent: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        self.0.insert(intent.into(), candidates);
        self
    }

    /// Preference list for an intent, or None if the intent is not configured
    pub fn candidates(&self, intent: &str) -> Option<&[Candidate]> {
        self.0.get(intent).map(Vec::as_slice)
    }

    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check every candidate names a known provider and no list is empty
    pub fn validate(&self, providers: &HashSet<&str>) -> AppResult<()> {
        if self.0.is_empty() {
            return Err(AppError::Config(
                "at least one intent must be configured under [intents]".to_string(),
            ));
        }

        for (intent, candidates) in &self.0 {
            if candidates.is_empty() {
                return Err(AppError::Config(format!(
                    "intents.{} has no candidates",
                    intent
                )));
            }
            for candidate in candidates {
                if !providers.contains(candidate.provider.as_str()) {
                    return Err(AppError::Config(format!(
                        "intents.{} references unknown provider '{}'",
                        intent, candidate.provider
                    )));
                }
                if candidate.model.trim().is_empty() {
                    return Err(AppError::Config(format!(
                        "intents.{} has an empty model name for provider '{}'",
                        intent, candidate.provider
                    )));
                }
            }
        }

        Ok(())
    }
}
