//! Quotaroute - quota-aware failover router for third-party LLM providers
//!
//! Requests name an intent (chat, utility, reasoning, ...). Each intent maps to
//! an ordered list of (provider, model) candidates; the router walks that list,
//! skipping providers that are cooling down or out of daily quota, and fails
//! over on rate limits, overloads and errors until one candidate answers.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod router;
pub mod telemetry;
