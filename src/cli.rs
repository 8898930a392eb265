//! Command-line interface for Quotaroute
//!
//! Provides argument parsing and subcommand handling for the Quotaroute binary.

use crate::config::{Config, SecretSource};
use crate::models::ProviderHealth;
use crate::models::reporter::summary_lines;
use clap::{Parser, Subcommand};

/// Quota-aware failover router for third-party LLM providers
#[derive(Parser)]
#[command(name = "quotaroute")]
#[command(version)]
#[command(about = "Quota-aware failover router for third-party LLM providers")]
#[command(
    long_about = "Quotaroute serves completions for named intents from an ordered list of \
    (provider, model) candidates, skipping providers that are cooling down or out of daily \
    quota and failing over on rate limits, overloads and errors."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load and validate the configuration, then report which providers have credentials
    Check,
}

/// Credential report printed by `quotaroute check`
///
/// One summary line per credentialed provider, then one line per provider
/// that will stay disabled because its secret is missing.
pub fn credential_report(config: &Config, secrets: &dyn SecretSource) -> Vec<String> {
    let health = ProviderHealth::new();
    let mut disabled = Vec::new();

    for provider in &config.providers {
        let keys = provider.credentials(secrets).len();
        if keys == 0 {
            disabled.push(format!(
                "{}: disabled ({} not set)",
                provider.name(),
                provider.secret_env()
            ));
        } else {
            health.register(provider, keys);
        }
    }

    let mut lines = summary_lines(&health, None);
    lines.extend(disabled);
    lines
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Quotaroute Configuration
# =========================
#
# Providers, per-intent candidate lists, quota epoch and server settings.
# API keys are never stored here: each provider names the environment
# variable that holds its key(s). Providers whose variable is unset are
# disabled at startup and skipped by every intent.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port

# ─────────────────────────────────────────────────────────────────────────────
# QUOTA EPOCH
# ─────────────────────────────────────────────────────────────────────────────

[quota]
# Hour (UTC, 0-23) at which daily counters reset
reset_utc_hour = 0
# Run the reset task inside the server; disable if something else resets quotas
enable_reset_task = true

# ─────────────────────────────────────────────────────────────────────────────
# TIMEOUTS
# ─────────────────────────────────────────────────────────────────────────────

[timeouts]
# Per-call upstream timeout in seconds, (0, 300]
request_seconds = 60

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# kind:
#   - "gemini": native generateContent API (base_url optional)
#   - "openai": any OpenAI-compatible /chat/completions API (base_url required)
#
# daily_quota / model_daily_quota: positive integer or "unbounded".
# Providers stop being selected once usage reaches 95% of the ceiling.

[[providers]]
name = "gemini"
kind = "gemini"
secret_env = "GEMINI_API_KEY"
# Comma-separated keys in GEMINI_API_KEY are rotated per call
supports_multiple_credentials = true
daily_quota = 1500
per_minute_quota = 15

[providers.model_daily_quota]
"gemini-2.5-pro" = 50

[[providers]]
name = "groq"
kind = "openai"
base_url = "https://api.groq.com/openai/v1"
secret_env = "GROQ_API_KEY"
daily_quota = 14400
per_minute_quota = 30

[[providers]]
name = "deepseek"
kind = "openai"
base_url = "https://api.deepseek.com/v1"
secret_env = "DEEPSEEK_API_KEY"
daily_quota = "unbounded"
# Optional: externally hosted balance, served at /providers/deepseek/balance
balance_url = "https://api.deepseek.com/user/balance"
balance_pointer = "/balance_infos/0/total_balance"

# ─────────────────────────────────────────────────────────────────────────────
# INTENTS
# ─────────────────────────────────────────────────────────────────────────────
#
# Candidates are tried strictly in the listed order. Health only removes
# candidates that cannot serve right now; it never reorders the list.

[intents]
chat = [
    { provider = "gemini", model = "gemini-2.5-flash" },
    { provider = "groq", model = "llama-3.3-70b-versatile" },
    { provider = "deepseek", model = "deepseek-chat" },
]
utility = [
    { provider = "gemini", model = "gemini-2.5-flash-lite" },
    { provider = "groq", model = "llama-3.1-8b-instant" },
]
reasoning = [
    { provider = "gemini", model = "gemini-2.5-pro" },
    { provider = "deepseek", model = "deepseek-reasoner" },
]
"#
}
