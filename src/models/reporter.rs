//! Operational status of the provider pool
//!
//! Read-only: nothing here mutates [`ProviderHealth`] or sits on the routing
//! path. The balance query is pull-based and cached; upstream failures are
//! logged and answered from the cache.

use crate::config::{Config, QuotaLimit, SecretSource};
use crate::error::AppResult;
use crate::models::health::{HealthSnapshot, ProviderHealth};
use crate::providers::{AdapterMap, ProviderError, http};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// How long a fetched balance is served without asking upstream again
pub const BALANCE_CACHE_TTL: Duration = Duration::from_secs(60);

const BALANCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serializable status of one provider, as reported by `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub available: bool,
    pub score: f64,
    pub credential_count: usize,
    pub daily_used: u64,
    pub daily_limit: QuotaLimit,
    pub minute_used: u32,
    pub minute_limit: u32,
    pub reliability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_secs_ago: Option<u64>,
}

impl ProviderStatus {
    fn from_snapshot(snapshot: &HealthSnapshot, now: Instant) -> Self {
        Self {
            name: snapshot.name().to_string(),
            available: snapshot.is_available_at(now),
            score: snapshot.score(),
            credential_count: snapshot.credential_count(),
            daily_used: snapshot.daily_used(),
            daily_limit: snapshot.daily_limit(),
            minute_used: snapshot.minute_used(),
            minute_limit: snapshot.minute_limit(),
            reliability: snapshot.reliability(),
            cooldown_remaining_ms: snapshot
                .cooldown_remaining(now)
                .map(|d| d.as_millis() as u64),
            last_success_secs_ago: snapshot
                .last_success()
                .map(|at| now.saturating_duration_since(at).as_secs()),
        }
    }
}

/// One line per credentialed provider: name, daily ceiling, key count
///
/// The key-count annotation only appears when adapters are supplied and the
/// provider rotates more than one credential.
pub fn summary_lines(health: &ProviderHealth, adapters: Option<&AdapterMap>) -> Vec<String> {
    health
        .snapshots()
        .iter()
        .filter(|s| s.has_credential())
        .map(|s| {
            let keys = adapters
                .and_then(|map| map.get(s.name()))
                .map(|adapter| adapter.credential_count())
                .filter(|count| *count > 1);
            match keys {
                Some(count) => format!("{}: daily {} ({} keys)", s.name(), s.daily_limit(), count),
                None => format!("{}: daily {}", s.name(), s.daily_limit()),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct BalanceSource {
    url: String,
    pointer: String,
    key: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct CachedBalance {
    value: f64,
    fetched_at: Instant,
}

/// Formats health state and answers balance queries
pub struct HealthReporter {
    health: Arc<ProviderHealth>,
    sources: HashMap<String, BalanceSource>,
    client: reqwest::Client,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedBalance>>,
}

impl HealthReporter {
    /// Collect balance sources for providers that declare one
    pub fn new(
        health: Arc<ProviderHealth>,
        config: &Config,
        secrets: &dyn SecretSource,
    ) -> AppResult<Self> {
        let sources = config
            .providers
            .iter()
            .filter_map(|p| {
                let source = BalanceSource {
                    url: p.balance_url()?.to_string(),
                    pointer: p.balance_pointer()?.to_string(),
                    key: p.credentials(secrets).into_iter().next(),
                };
                Some((p.name().to_string(), source))
            })
            .collect();

        Ok(Self {
            health,
            sources,
            client: http::build_client("balance", BALANCE_TIMEOUT)?,
            ttl: BALANCE_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Override the cache lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn summary(&self, adapters: Option<&AdapterMap>) -> Vec<String> {
        summary_lines(&self.health, adapters)
    }

    /// Per-provider status for every registered provider, sorted by name
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        let now = Instant::now();
        self.health
            .snapshots()
            .iter()
            .map(|s| ProviderStatus::from_snapshot(s, now))
            .collect()
    }

    pub fn has_balance_source(&self, provider: &str) -> bool {
        self.sources.contains_key(provider)
    }

    /// Externally hosted balance for `provider`
    ///
    /// Serves the cached value while it is fresh. A failed refresh falls back
    /// to the last value seen, or None if there never was one.
    pub async fn balance(&self, provider: &str) -> Option<f64> {
        let source = self.sources.get(provider)?;
        let cached = self.cache().get(provider).copied();

        if let Some(entry) = cached.filter(|c| c.fetched_at.elapsed() < self.ttl) {
            return Some(entry.value);
        }

        match self.fetch(provider, source).await {
            Ok(value) => {
                self.cache().insert(
                    provider.to_string(),
                    CachedBalance {
                        value,
                        fetched_at: Instant::now(),
                    },
                );
                tracing::debug!(provider = %provider, balance = value, "Balance refreshed");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    provider = %provider,
                    error = %e,
                    cached = cached.is_some(),
                    "Balance query failed, serving cached value"
                );
                cached.map(|entry| entry.value)
            }
        }
    }

    async fn fetch(&self, provider: &str, source: &BalanceSource) -> Result<f64, ProviderError> {
        let mut request = self.client.get(&source.url);
        if let Some(key) = source.key.as_deref() {
            request = request.bearer_auth(key);
        }

        let raw = http::send(provider, request).await?;
        let body: serde_json::Value = http::parse_body(provider, &raw)?;
        extract_balance(&body, &source.pointer).ok_or_else(|| {
            ProviderError::generic(
                provider,
                format!("no numeric balance at {}", source.pointer),
            )
        })
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, CachedBalance>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read a number (or numeric string) at a JSON pointer
fn extract_balance(body: &serde_json::Value, pointer: &str) -> Option<f64> {
    let value = body.pointer(pointer)?;
    value
        .as_f64()
        .or_else(|| value.as_str()?.trim().parse().ok())
        .filter(|v: &f64| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::providers::{
        CompletionRequest, CompletionResult, ProviderAdapter, ProviderError,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct KeyCountAdapter(usize);

    #[async_trait]
    impl ProviderAdapter for KeyCountAdapter {
        fn name(&self) -> &str {
            "stub"
        }

        fn is_available(&self) -> bool {
            self.0 > 0
        }

        fn credential_count(&self) -> usize {
            self.0
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResult, ProviderError> {
            Err(ProviderError::generic("stub", "not callable"))
        }
    }

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
        .unwrap()
    }

    fn balance_config(server_uri: &str) -> Config {
        toml::from_str(&format!(
            r#"
[[providers]]
name = "deepseek"
kind = "openai"
base_url = "{server_uri}/v1"
secret_env = "DEEPSEEK_API_KEY"
balance_url = "{server_uri}/user/balance"
balance_pointer = "/balance_infos/0/total_balance"

[intents]
chat = [{{ provider = "deepseek", model = "deepseek-chat" }}]
"#
        ))
        .unwrap()
    }

    fn secrets() -> HashMap<String, String> {
        HashMap::from([("DEEPSEEK_API_KEY".to_string(), "sk-test".to_string())])
    }

    #[test]
    fn test_summary_lists_only_credentialed_providers() {
        let health = ProviderHealth::new();
        health.register(&provider("gemini", "1500"), 1);
        health.register(&provider("groq", "\"unbounded\""), 1);
        health.register(&provider("mistral", "100"), 0);

        let lines = summary_lines(&health, None);
        assert_eq!(lines, vec!["gemini: daily 1500", "groq: daily unbounded"]);
    }

    #[test]
    fn test_summary_annotates_multi_key_providers() {
        let health = ProviderHealth::new();
        health.register(&provider("gemini", "1500"), 3);
        health.register(&provider("groq", "1000"), 1);

        let mut adapters = AdapterMap::new();
        adapters.insert("gemini".into(), Arc::new(KeyCountAdapter(3)));
        adapters.insert("groq".into(), Arc::new(KeyCountAdapter(1)));

        let lines = summary_lines(&health, Some(&adapters));
        assert_eq!(lines, vec!["gemini: daily 1500 (3 keys)", "groq: daily 1000"]);
    }

    #[test]
    fn test_extract_balance_number_or_string() {
        let body = json!({"data": {"balance": 12.5, "text": " 7.25 ", "bad": "n/a"}});
        assert_eq!(extract_balance(&body, "/data/balance"), Some(12.5));
        assert_eq!(extract_balance(&body, "/data/text"), Some(7.25));
        assert_eq!(extract_balance(&body, "/data/bad"), None);
        assert_eq!(extract_balance(&body, "/missing"), None);
    }

    #[tokio::test]
    async fn test_statuses_report_cooldown() {
        let health = Arc::new(ProviderHealth::new());
        health.register(&provider("groq", "1000"), 1);
        health.on_503("groq");

        let config: Config = balance_config("http://localhost");
        let reporter =
            HealthReporter::new(health, &config, &HashMap::<String, String>::new()).unwrap();
        let statuses = reporter.statuses();

        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].available);
        assert!(statuses[0].cooldown_remaining_ms.is_some());
    }

    #[tokio::test]
    async fn test_balance_without_source_is_none() {
        let health = Arc::new(ProviderHealth::new());
        let config = balance_config("http://localhost");
        let reporter = HealthReporter::new(health, &config, &secrets()).unwrap();

        assert!(reporter.has_balance_source("deepseek"));
        assert_eq!(reporter.balance("groq").await, None);
    }

    #[tokio::test]
    async fn test_balance_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/balance"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balance_infos": [{"currency": "USD", "total_balance": "4.20"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = balance_config(&server.uri());
        let reporter =
            HealthReporter::new(Arc::new(ProviderHealth::new()), &config, &secrets()).unwrap();

        assert_eq!(reporter.balance("deepseek").await, Some(4.2));
        assert_eq!(reporter.balance("deepseek").await, Some(4.2));
    }

    #[tokio::test]
    async fn test_balance_failure_serves_stale_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balance_infos": [{"total_balance": 9.0}]
            })))
            .mount(&server)
            .await;

        let config = balance_config(&server.uri());
        let reporter = HealthReporter::new(Arc::new(ProviderHealth::new()), &config, &secrets())
            .unwrap()
            .with_ttl(Duration::ZERO);
        assert_eq!(reporter.balance("deepseek").await, Some(9.0));

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/user/balance"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert_eq!(reporter.balance("deepseek").await, Some(9.0));
    }

    #[tokio::test]
    async fn test_balance_failure_without_cache_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/balance"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = balance_config(&server.uri());
        let reporter =
            HealthReporter::new(Arc::new(ProviderHealth::new()), &config, &secrets()).unwrap();
        assert_eq!(reporter.balance("deepseek").await, None);
    }
}
