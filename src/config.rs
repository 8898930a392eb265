//! Configuration management for Quotaroute
//!
//! Parses TOML configuration files and provides typed access to the static
//! provider registry, the intent preference matrix, and server settings.

use crate::error::{AppError, AppResult};
use crate::models::intent::IntentMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    pub providers: Vec<ProviderConfig>,
    pub intents: IntentMatrix,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Quota-epoch configuration
///
/// Providers reset their daily counters at a single global boundary. The
/// bundled reset task fires at `reset_utc_hour:00` UTC every day.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub reset_utc_hour: u8,
    #[serde(default = "default_true")]
    pub enable_reset_task: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            reset_utc_hour: 0,
            enable_reset_task: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Upstream timeout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Per-adapter-call timeout in seconds
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
        }
    }
}

fn default_request_seconds() -> u64 {
    60
}

/// Upper bound for `timeouts.request_seconds`
const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Daily request ceiling for a provider or model
///
/// Deserializes from a positive integer or the string `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotaLimit {
    Limited(u64),
    #[default]
    Unbounded,
}

impl QuotaLimit {
    /// Returns the numeric ceiling, or None when unbounded
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(n) => Some(*n),
            Self::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(n) => write!(f, "{}", n),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl Serialize for QuotaLimit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Limited(n) => serializer.serialize_u64(*n),
            Self::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

/// Validates during deserialization so a zero ceiling can never be represented.
impl<'de> Deserialize<'de> for QuotaLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawQuota {
            Count(i64),
            Word(String),
        }

        match RawQuota::deserialize(deserializer)? {
            RawQuota::Count(n) if n > 0 => Ok(Self::Limited(n as u64)),
            RawQuota::Count(n) => Err(serde::de::Error::custom(format!(
                "quota must be a positive integer or \"unbounded\", got {}",
                n
            ))),
            RawQuota::Word(w) if w.eq_ignore_ascii_case("unbounded") => Ok(Self::Unbounded),
            RawQuota::Word(w) => Err(serde::de::Error::custom(format!(
                "quota must be a positive integer or \"unbounded\", got \"{}\"",
                w
            ))),
        }
    }
}

/// Protocol family spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ProviderKind {
    /// REST, OpenAI-compatible `/chat/completions`
    #[serde(rename = "openai")]
    OpenAi,
    /// Native Gemini `generateContent`
    #[serde(rename = "gemini")]
    Gemini,
}

/// Static per-provider configuration
///
/// Fields are private; instances come from deserialization and are checked
/// by `Config::validate()`, after which they are never mutated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    name: String,
    kind: ProviderKind,
    /// Optional for native providers, which fall back to their public endpoint
    #[serde(default)]
    base_url: Option<String>,
    /// Name of the environment variable holding the API key(s)
    secret_env: String,
    #[serde(default)]
    supports_multiple_credentials: bool,
    #[serde(default)]
    daily_quota: QuotaLimit,
    #[serde(default)]
    model_daily_quota: HashMap<String, QuotaLimit>,
    #[serde(default = "default_per_minute_quota")]
    per_minute_quota: u32,
    #[serde(default)]
    balance_url: Option<String>,
    #[serde(default)]
    balance_pointer: Option<String>,
}

fn default_per_minute_quota() -> u32 {
    60
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn secret_env(&self) -> &str {
        &self.secret_env
    }

    pub fn supports_multiple_credentials(&self) -> bool {
        self.supports_multiple_credentials
    }

    /// Default daily ceiling applied when a model has no override
    pub fn daily_quota(&self) -> QuotaLimit {
        self.daily_quota
    }

    pub fn model_daily_quota(&self) -> &HashMap<String, QuotaLimit> {
        &self.model_daily_quota
    }

    pub fn per_minute_quota(&self) -> u32 {
        self.per_minute_quota
    }

    pub fn balance_url(&self) -> Option<&str> {
        self.balance_url.as_deref()
    }

    /// JSON pointer into the balance response (e.g. `/data/balance`)
    pub fn balance_pointer(&self) -> Option<&str> {
        self.balance_pointer.as_deref()
    }

    /// Resolve API keys for this provider from a secret source
    ///
    /// Providers that support several credentials accept a comma-separated
    /// list; everyone else gets the whole value as one key. Empty entries are
    /// dropped, so an unset or blank secret yields an empty list.
    pub fn credentials(&self, secrets: &dyn SecretSource) -> Vec<String> {
        let Some(raw) = secrets.lookup(&self.secret_env) else {
            return Vec::new();
        };

        if self.supports_multiple_credentials {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            let key = raw.trim();
            if key.is_empty() {
                Vec::new()
            } else {
                vec![key.to_string()]
            }
        }
    }
}

/// Source of secret values referenced by `secret_env`
pub trait SecretSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads secrets from process environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a provider's static configuration by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Validate cross-field invariants that serde cannot express
    pub fn validate(&self) -> AppResult<()> {
        if self.providers.is_empty() {
            return Err(AppError::Config(
                "at least one [[providers]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Config(
                    "provider name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            if provider.secret_env.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "providers.{}.secret_env cannot be empty",
                    provider.name
                )));
            }
            if provider.kind == ProviderKind::OpenAi && provider.base_url.is_none() {
                return Err(AppError::Config(format!(
                    "providers.{}.base_url is required for kind = \"openai\"",
                    provider.name
                )));
            }
            if provider.per_minute_quota == 0 {
                return Err(AppError::Config(format!(
                    "providers.{}.per_minute_quota must be greater than 0",
                    provider.name
                )));
            }
            if provider.balance_url.is_some() && provider.balance_pointer.is_none() {
                return Err(AppError::Config(format!(
                    "providers.{}.balance_pointer is required when balance_url is set",
                    provider.name
                )));
            }
        }

        if self.timeouts.request_seconds == 0 || self.timeouts.request_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(AppError::Config(format!(
                "timeouts.request_seconds must be in (0, {}], got {}",
                MAX_TIMEOUT_SECONDS, self.timeouts.request_seconds
            )));
        }

        if self.quota.reset_utc_hour > 23 {
            return Err(AppError::Config(format!(
                "quota.reset_utc_hour must be in [0, 23], got {}",
                self.quota.reset_utc_hour
            )));
        }

        self.intents.validate(&seen)
    }
}
