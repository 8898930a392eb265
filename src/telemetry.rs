//! Structured logging setup
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and `tower_http` request spans stay at debug.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Default filter directive for a configured log level
pub fn default_directive(level: &str) -> String {
    format!("quotaroute={},tower_http=debug", level)
}

/// Initialize the global tracing subscriber
///
/// Only the first call per process has any effect.
///
/// ```no_run
/// quotaroute::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_crate_level() {
        assert_eq!(default_directive("warn"), "quotaroute=warn,tower_http=debug");
        assert!(EnvFilter::try_new(default_directive("debug")).is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        init("info");
        init("debug");
    }
}
