//! Quota-epoch reset task
//!
//! Free tiers reset their daily counters at a fixed UTC hour. This task sleeps
//! until that boundary and calls [`ProviderHealth::reset_all_rpd`], once per
//! day, for the life of the process.

use crate::models::health::ProviderHealth;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Time from `now_unix_secs` until the next `reset_utc_hour:00:00` UTC
///
/// Landing exactly on the boundary schedules the following day's boundary,
/// so a reset that just ran is never repeated.
pub fn delay_until_next_reset(now_unix_secs: u64, reset_utc_hour: u8) -> Duration {
    let into_day = now_unix_secs % SECS_PER_DAY;
    let boundary = u64::from(reset_utc_hour) * 3600;

    let wait = if into_day < boundary {
        boundary - into_day
    } else {
        SECS_PER_DAY - into_day + boundary
    };
    Duration::from_secs(wait)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Spawn the daily reset loop plus a monitor that reports if it ever stops
pub fn start_reset_task(health: Arc<ProviderHealth>, reset_utc_hour: u8) {
    let handle = tokio::spawn(async move {
        tracing::info!(reset_utc_hour, "Starting quota-epoch reset task");

        loop {
            let delay = delay_until_next_reset(unix_now(), reset_utc_hour);
            tracing::debug!(
                next_reset_in_secs = delay.as_secs(),
                "Scheduled next quota reset"
            );
            tokio::time::sleep(delay).await;

            tracing::info!(reset_utc_hour, "Quota epoch boundary reached");
            health.reset_all_rpd();
        }
    });

    tokio::spawn(async move {
        match handle.await {
            Ok(_) => {
                tracing::error!(
                    "Quota reset task terminated unexpectedly. Daily counters \
                    will not reset until server restart."
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Quota reset task panicked. Daily counters will not reset \
                    until server restart."
                );
            }
        }
    });
}
