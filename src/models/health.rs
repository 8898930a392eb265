//! Quota-aware provider health tracking
//!
//! Single source of truth for whether, and how well, a provider can serve a
//! request right now. Combines three independent signals:
//! - daily quota usage (soft-gated at 95% of the ceiling)
//! - an explicit cooldown deadline set by failure mutators
//! - an exponentially smoothed reliability score in [0, 1]
//!
//! State is mutated only through the event methods on [`ProviderHealth`].
//! Reads hand out [`HealthSnapshot`] copies, never references into the store.
//!
//! Time is measured with `tokio::time::Instant` so cooldowns can be driven by
//! a paused test clock.

use crate::config::{ProviderConfig, QuotaLimit};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Fraction of the daily ceiling at which a provider stops being offered
const SOFT_QUOTA_MARGIN: f64 = 0.95;

/// Cooldown after a 429 with no retry hint
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_millis(90_000);

/// Retry hints longer than this are treated as daily quota exhaustion
pub const QUOTA_EXHAUSTION_RETRY_MS: u64 = 3_600_000;

pub const OVERLOAD_COOLDOWN: Duration = Duration::from_secs(30);
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(60);
pub const FATAL_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

const OVERLOAD_PENALTY: f64 = 0.8;
const ERROR_PENALTY: f64 = 0.5;

/// Per-minute accounting window
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct ProviderState {
    credential_count: usize,
    daily_used: u64,
    daily_limit: QuotaLimit,
    minute_used: u32,
    minute_limit: u32,
    minute_window_start: Instant,
    reliability: f64,
    cool_until: Option<Instant>,
    last_success: Option<Instant>,
    model_limits: HashMap<String, QuotaLimit>,
}

impl ProviderState {
    fn cool_for(&mut self, now: Instant, duration: Duration) {
        self.cool_until = Some(now + duration);
    }

    fn minute_used_at(&self, now: Instant) -> u32 {
        if now.duration_since(self.minute_window_start) >= MINUTE_WINDOW {
            0
        } else {
            self.minute_used
        }
    }
}

/// Read-only view of one provider's health
///
/// When requested for a model with its own quota override, `daily_limit`
/// carries the model's ceiling; the stored provider record is untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    name: String,
    credential_count: usize,
    daily_used: u64,
    daily_limit: QuotaLimit,
    minute_used: u32,
    minute_limit: u32,
    reliability: f64,
    cool_until: Option<Instant>,
    last_success: Option<Instant>,
}

impl HealthSnapshot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_credential(&self) -> bool {
        self.credential_count > 0
    }

    pub fn credential_count(&self) -> usize {
        self.credential_count
    }

    pub fn daily_used(&self) -> u64 {
        self.daily_used
    }

    pub fn daily_limit(&self) -> QuotaLimit {
        self.daily_limit
    }

    pub fn minute_used(&self) -> u32 {
        self.minute_used
    }

    pub fn minute_limit(&self) -> u32 {
        self.minute_limit
    }

    pub fn reliability(&self) -> f64 {
        self.reliability
    }

    pub fn cool_until(&self) -> Option<Instant> {
        self.cool_until
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Time left on the cooldown, if one is still running at `now`
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cool_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// True once usage reaches the soft margin below the daily ceiling
    pub fn quota_exhausted(&self) -> bool {
        self.daily_limit
            .limit()
            .is_some_and(|limit| self.daily_used as f64 >= SOFT_QUOTA_MARGIN * limit as f64)
    }

    pub fn is_available_at(&self, now: Instant) -> bool {
        self.has_credential() && self.cooldown_remaining(now).is_none() && !self.quota_exhausted()
    }

    /// Ranking signal: remaining quota fraction weighted by reliability
    pub fn score(&self) -> f64 {
        match self.daily_limit {
            QuotaLimit::Unbounded => self.reliability,
            QuotaLimit::Limited(limit) => {
                let remaining = 1.0 - self.daily_used as f64 / limit as f64;
                remaining.clamp(0.0, 1.0) * self.reliability
            }
        }
    }
}

/// Shared, mutable health registry for every credentialed provider
///
/// Safe for concurrent use: every mutator takes the write lock for the whole
/// read-modify-write, so counters never lose updates.
#[derive(Debug, Default)]
pub struct ProviderHealth {
    states: RwLock<BTreeMap<String, ProviderState>>,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ProviderState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ProviderState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the health record for a provider
    ///
    /// Starts fully trusted, not cooling, with the provider's default daily
    /// ceiling. Registering an existing name replaces its record.
    pub fn register(&self, config: &ProviderConfig, credential_count: usize) {
        let now = Instant::now();
        let state = ProviderState {
            credential_count,
            daily_used: 0,
            daily_limit: config.daily_quota(),
            minute_used: 0,
            minute_limit: config.per_minute_quota(),
            minute_window_start: now,
            reliability: 1.0,
            cool_until: None,
            last_success: None,
            model_limits: config.model_daily_quota().clone(),
        };

        let replaced = self.write().insert(config.name().to_string(), state);
        if replaced.is_some() {
            tracing::warn!(
                provider = %config.name(),
                "Provider re-registered, previous health record discarded"
            );
        } else {
            tracing::debug!(
                provider = %config.name(),
                daily_limit = %config.daily_quota(),
                credential_count,
                "Provider registered"
            );
        }
    }

    pub fn is_registered(&self, provider: &str) -> bool {
        self.read().contains_key(provider)
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Snapshot of a provider's health, optionally through a model's quota
    pub fn get(&self, provider: &str, model: Option<&str>) -> Option<HealthSnapshot> {
        let states = self.read();
        let state = states.get(provider)?;
        Some(Self::snapshot(provider, state, model, Instant::now()))
    }

    /// Snapshots for every registered provider, sorted by name
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let now = Instant::now();
        self.read()
            .iter()
            .map(|(name, state)| Self::snapshot(name, state, None, now))
            .collect()
    }

    fn snapshot(
        name: &str,
        state: &ProviderState,
        model: Option<&str>,
        now: Instant,
    ) -> HealthSnapshot {
        let daily_limit = model
            .and_then(|m| state.model_limits.get(m))
            .copied()
            .unwrap_or(state.daily_limit);

        HealthSnapshot {
            name: name.to_string(),
            credential_count: state.credential_count,
            daily_used: state.daily_used,
            daily_limit,
            minute_used: state.minute_used_at(now),
            minute_limit: state.minute_limit,
            reliability: state.reliability,
            cool_until: state.cool_until,
            last_success: state.last_success,
        }
    }

    /// Whether the provider (and model, if given) can take a request now
    ///
    /// Unregistered providers are never available.
    pub fn is_available(&self, provider: &str, model: Option<&str>) -> bool {
        self.get(provider, model)
            .is_some_and(|s| s.is_available_at(Instant::now()))
    }

    /// Ranking score in [0, 1]; 0 for unregistered providers
    pub fn score(&self, provider: &str, model: Option<&str>) -> f64 {
        self.get(provider, model).map_or(0.0, |s| s.score())
    }

    fn mutate<F>(&self, provider: &str, event: &'static str, f: F)
    where
        F: FnOnce(&mut ProviderState, Instant),
    {
        let mut states = self.write();
        match states.get_mut(provider) {
            Some(state) => f(state, Instant::now()),
            None => tracing::warn!(
                provider = %provider,
                event,
                "Ignoring health event for unregistered provider"
            ),
        }
    }

    /// Record a successful completion
    pub fn on_success(&self, provider: &str) {
        self.mutate(provider, "success", |state, now| {
            state.daily_used += 1;
            if now.duration_since(state.minute_window_start) >= MINUTE_WINDOW {
                state.minute_window_start = now;
                state.minute_used = 0;
            }
            state.minute_used += 1;
            state.last_success = Some(now);
            state.reliability = (0.9 * state.reliability + 0.1).min(1.0);
        });
    }

    /// Record a 429 response
    ///
    /// Retry hints beyond one hour mean the daily quota is gone: usage is
    /// pinned to the ceiling so the provider stays out until the next epoch
    /// reset, even after the explicit cooldown lapses.
    pub fn on_429(&self, provider: &str, retry_after_ms: Option<u64>) {
        self.mutate(provider, "rate_limited", |state, now| {
            let cooldown = retry_after_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN);
            state.cool_for(now, cooldown);

            if retry_after_ms.is_some_and(|ms| ms > QUOTA_EXHAUSTION_RETRY_MS) {
                if let Some(limit) = state.daily_limit.limit() {
                    state.daily_used = state.daily_used.max(limit);
                }
                tracing::warn!(
                    provider = %provider,
                    retry_after_ms,
                    "Long retry hint, treating provider quota as exhausted until reset"
                );
            } else {
                tracing::debug!(
                    provider = %provider,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Provider rate limited, cooling down"
                );
            }
        });
    }

    /// Record a 503 / overloaded response
    pub fn on_503(&self, provider: &str) {
        self.mutate(provider, "overloaded", |state, now| {
            state.cool_for(now, OVERLOAD_COOLDOWN);
            state.reliability *= OVERLOAD_PENALTY;
        });
    }

    /// Record a generic failure
    pub fn on_error(&self, provider: &str) {
        self.mutate(provider, "error", |state, now| {
            state.cool_for(now, ERROR_COOLDOWN);
            state.reliability *= ERROR_PENALTY;
        });
    }

    /// Record an auth or billing failure
    pub fn on_fatal(&self, provider: &str) {
        self.mutate(provider, "fatal", |state, now| {
            state.cool_for(now, FATAL_COOLDOWN);
            state.reliability = 0.0;
            tracing::error!(
                provider = %provider,
                "Provider rejected credentials or billing, disabled for 24h"
            );
        });
    }

    /// Start a new quota epoch for every provider
    ///
    /// Usage returns to zero; reliability recovers only partially so that
    /// yesterday's instability leaves a residual penalty.
    pub fn reset_all_rpd(&self) {
        let mut states = self.write();
        for state in states.values_mut() {
            state.daily_used = 0;
            state.reliability = (0.8 * state.reliability + 0.2).min(1.0);
        }
        tracing::info!(providers = states.len(), "Daily quota counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(toml_str: &str) -> ProviderConfig {
        toml::from_str(toml_str).expect("should parse provider config")
    }

    fn limited(name: &str, limit: u64) -> ProviderConfig {
        provider(&format!(
            r#"
name = "{name}"
kind = "openai"
base_url = "http://localhost/v1"
secret_env = "KEY"
daily_quota = {limit}
per_minute_quota = 30

[model_daily_quota]
"big-model" = 10
"free-model" = "unbounded"
"#
        ))
    }

    fn unbounded(name: &str) -> ProviderConfig {
        provider(&format!(
            r#"
name = "{name}"
kind = "openai"
base_url = "http://localhost/v1"
secret_env = "KEY"
"#
        ))
    }

    #[test]
    fn test_register_starts_trusted_and_available() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);

        let snap = health.get("gemini", None).unwrap();
        assert_eq!(snap.daily_used(), 0);
        assert_eq!(snap.daily_limit(), QuotaLimit::Limited(100));
        assert_eq!(snap.minute_limit(), 30);
        assert_eq!(snap.reliability(), 1.0);
        assert!(snap.cool_until().is_none());
        assert!(health.is_available("gemini", None));
    }

    #[test]
    fn test_zero_credentials_is_unavailable() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 0);
        assert!(!health.is_available("gemini", None));
    }

    #[test]
    fn test_model_override_is_a_view_only() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);

        let view = health.get("gemini", Some("big-model")).unwrap();
        assert_eq!(view.daily_limit(), QuotaLimit::Limited(10));

        let stored = health.get("gemini", None).unwrap();
        assert_eq!(stored.daily_limit(), QuotaLimit::Limited(100));

        let other = health.get("gemini", Some("no-override")).unwrap();
        assert_eq!(other.daily_limit(), QuotaLimit::Limited(100));
    }

    #[test]
    fn test_soft_margin_blocks_at_95_percent() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);

        for _ in 0..94 {
            health.on_success("gemini");
        }
        assert!(health.is_available("gemini", None));

        health.on_success("gemini");
        assert!(!health.is_available("gemini", None), "95/100 is exhausted");
    }

    #[test]
    fn test_model_quota_can_exhaust_before_provider_quota() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);

        for _ in 0..10 {
            health.on_success("gemini");
        }
        assert!(!health.is_available("gemini", Some("big-model")));
        assert!(health.is_available("gemini", Some("small-model")));
        assert!(health.is_available("gemini", Some("free-model")));
    }

    #[test]
    fn test_score_uses_remaining_quota_times_reliability() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);
        for _ in 0..50 {
            health.on_success("gemini");
        }
        // reliability stays at 1.0 under repeated success
        assert!((health.score("gemini", None) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_unbounded_is_reliability() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);
        health.on_error("groq");
        assert!((health.score("groq", None) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped_when_model_view_is_overdrawn() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);
        for _ in 0..20 {
            health.on_success("gemini");
        }
        assert_eq!(health.score("gemini", Some("big-model")), 0.0);
    }

    #[test]
    fn test_success_heals_gradually() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);
        health.on_error("groq");
        health.on_error("groq");
        health.on_success("groq");

        let r = health.get("groq", None).unwrap().reliability();
        assert!((r - (0.9 * 0.25 + 0.1)).abs() < 1e-9);
        assert!(r < 1.0);
    }

    #[test]
    fn test_fatal_zeroes_reliability() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);
        health.on_fatal("groq");

        let snap = health.get("groq", None).unwrap();
        assert_eq!(snap.reliability(), 0.0);
        assert!(!health.is_available("groq", None));
    }

    #[test]
    fn test_long_retry_after_pins_usage_to_ceiling() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);
        health.on_429("gemini", Some(7_200_000));

        let snap = health.get("gemini", None).unwrap();
        assert_eq!(snap.daily_used(), 100);
    }

    #[test]
    fn test_short_retry_after_leaves_usage_alone() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);
        health.on_429("gemini", Some(QUOTA_EXHAUSTION_RETRY_MS));
        assert_eq!(health.get("gemini", None).unwrap().daily_used(), 0);
    }

    #[test]
    fn test_reset_all_rpd_partial_recovery() {
        let health = ProviderHealth::new();
        health.register(&limited("gemini", 100), 1);
        health.register(&unbounded("groq"), 1);

        health.on_success("gemini");
        health.on_error("groq");

        health.reset_all_rpd();

        let gemini = health.get("gemini", None).unwrap();
        assert_eq!(gemini.daily_used(), 0);
        assert!((gemini.reliability() - 1.0).abs() < 1e-9);

        let groq = health.get("groq", None).unwrap();
        assert!((groq.reliability() - (0.8 * 0.5 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_unregistered_provider_mutators_are_noops() {
        let health = ProviderHealth::new();
        health.on_success("ghost");
        health.on_429("ghost", Some(1000));
        health.on_503("ghost");
        health.on_error("ghost");
        health.on_fatal("ghost");

        assert!(health.get("ghost", None).is_none());
        assert!(!health.is_available("ghost", None));
        assert_eq!(health.score("ghost", None), 0.0);
    }

    #[test]
    fn test_snapshots_sorted_by_name() {
        let health = ProviderHealth::new();
        health.register(&unbounded("zeta"), 1);
        health.register(&unbounded("alpha"), 1);

        let names: Vec<_> = health
            .snapshots()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(health.providers(), vec!["alpha", "zeta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_window_rolls_over() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);

        health.on_success("groq");
        health.on_success("groq");
        assert_eq!(health.get("groq", None).unwrap().minute_used(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(health.get("groq", None).unwrap().minute_used(), 0);

        health.on_success("groq");
        assert_eq!(health.get("groq", None).unwrap().minute_used(), 1);
        assert_eq!(health.get("groq", None).unwrap().daily_used(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_cooldown_is_thirty_seconds() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);
        health.on_503("groq");

        assert!(!health.is_available("groq", None));
        assert!((health.get("groq", None).unwrap().reliability() - 0.8).abs() < 1e-9);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!health.is_available("groq", None));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(health.is_available("groq", None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_hint_uses_default_cooldown() {
        let health = ProviderHealth::new();
        health.register(&unbounded("groq"), 1);
        health.on_429("groq", None);

        tokio::time::advance(Duration::from_secs(89)).await;
        assert!(!health.is_available("groq", None));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(health.is_available("groq", None));
    }
}
