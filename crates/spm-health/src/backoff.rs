//! Next-check scheduling.
//!
//! Ready providers are checked every `interval`. Once a provider is not
//! ready, checks back off exponentially from `base_backoff_interval`,
//! starting at the failure that crossed the threshold:
//!
//! ```text
//! delay = min(max_backoff, base_backoff * 2^min(failures - threshold, 10))
//! ```

use std::time::Duration;

use spm_state::{HealthStatus, Timestamp};

use crate::config::HealthCheckConfig;

/// Ceiling on the backoff exponent. Keeps `base * 2^n` far from overflow
/// no matter how long a provider stays down.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Delay until the next check of a provider in `status` with the given
/// failure count.
pub fn check_delay(
    status: HealthStatus,
    consecutive_failures: u32,
    config: &HealthCheckConfig,
) -> Duration {
    match status {
        HealthStatus::Ready => config.interval,
        HealthStatus::NotReady => {
            let exponent = consecutive_failures
                .saturating_sub(config.max_consecutive_failures)
                .min(MAX_BACKOFF_EXPONENT);
            config
                .base_backoff_interval
                .checked_mul(1 << exponent)
                .unwrap_or(config.max_backoff_interval)
                .min(config.max_backoff_interval)
        }
    }
}

/// Absolute time of the next check, in Unix milliseconds.
pub fn next_check_time(
    now: Timestamp,
    status: HealthStatus,
    consecutive_failures: u32,
    config: &HealthCheckConfig,
) -> Timestamp {
    let delay = check_delay(status, consecutive_failures, config);
    let delay_ms = Timestamp::try_from(delay.as_millis()).unwrap_or(Timestamp::MAX);
    now.saturating_add(delay_ms)
}
