//! Health check configuration.
//!
//! Durations are written the human way both in TOML and in environment
//! variables: a sequence of decimal numbers with a unit suffix (`ns`, `us`,
//! `ms`, `s`, `m`, `h`), such as `"500ms"`, `"1.5s"` or `"1m30s"`, or a bare
//! number of seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HealthError, HealthResult};

pub const ENV_INTERVAL: &str = "HEALTH_CHECK_INTERVAL";
pub const ENV_TIMEOUT: &str = "HEALTH_CHECK_TIMEOUT";
pub const ENV_MAX_CONSECUTIVE_FAILURES: &str = "HEALTH_CHECK_MAX_CONSECUTIVE_FAILURES";
pub const ENV_BASE_BACKOFF_INTERVAL: &str = "HEALTH_CHECK_BASE_BACKOFF_INTERVAL";
pub const ENV_MAX_BACKOFF_INTERVAL: &str = "HEALTH_CHECK_MAX_BACKOFF_INTERVAL";

/// Parameters of the provider health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Scan period, and the steady-state delay between checks of a ready provider.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Upper bound for a single probe.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Consecutive failures after which a provider becomes not ready.
    pub max_consecutive_failures: u32,
    /// First backoff delay once a provider is not ready.
    #[serde(with = "duration_str")]
    pub base_backoff_interval: Duration,
    /// Ceiling for the backoff delay.
    #[serde(with = "duration_str")]
    pub max_backoff_interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
            base_backoff_interval: Duration::from_secs(10),
            max_backoff_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl HealthCheckConfig {
    /// Defaults overridden by the `HEALTH_CHECK_*` process environment.
    pub fn from_env() -> HealthResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from an environment-like lookup.
    ///
    /// Unset and empty variables leave the current value in place.
    pub fn apply_env<F>(&mut self, lookup: F) -> HealthResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_INTERVAL) {
            self.interval = duration_var(ENV_INTERVAL, &v)?;
        }
        if let Some(v) = get(ENV_TIMEOUT) {
            self.timeout = duration_var(ENV_TIMEOUT, &v)?;
        }
        if let Some(v) = get(ENV_MAX_CONSECUTIVE_FAILURES) {
            self.max_consecutive_failures =
                v.trim()
                    .parse()
                    .map_err(|_| HealthError::InvalidNumber {
                        key: ENV_MAX_CONSECUTIVE_FAILURES.to_string(),
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = get(ENV_BASE_BACKOFF_INTERVAL) {
            self.base_backoff_interval = duration_var(ENV_BASE_BACKOFF_INTERVAL, &v)?;
        }
        if let Some(v) = get(ENV_MAX_BACKOFF_INTERVAL) {
            self.max_backoff_interval = duration_var(ENV_MAX_BACKOFF_INTERVAL, &v)?;
        }
        Ok(())
    }

    /// Reject configurations the monitor cannot run with.
    pub fn validate(&self) -> HealthResult<()> {
        if self.interval.is_zero() {
            return Err(HealthError::InvalidConfig("interval must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(HealthError::InvalidConfig("timeout must be positive".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(HealthError::InvalidConfig(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.base_backoff_interval.is_zero() {
            return Err(HealthError::InvalidConfig(
                "base_backoff_interval must be positive".into(),
            ));
        }
        if self.base_backoff_interval > self.max_backoff_interval {
            return Err(HealthError::InvalidConfig(format!(
                "base_backoff_interval ({}) exceeds max_backoff_interval ({})",
                format_duration(self.base_backoff_interval),
                format_duration(self.max_backoff_interval),
            )));
        }
        if self.timeout >= self.interval {
            warn!(
                timeout = %format_duration(self.timeout),
                interval = %format_duration(self.interval),
                "probe timeout is not shorter than the check interval"
            );
        }
        Ok(())
    }
}

fn duration_var(key: &str, value: &str) -> HealthResult<Duration> {
    parse_duration(value).ok_or_else(|| HealthError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
    })
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string like "5s", "500ms", "1.5s", "1m30s", or "10".
///
/// Returns `None` for malformed input and for values too large for a
/// `Duration`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if s.is_empty() {
        return None;
    }

    let mut rest = s;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => return None,
        };
        total = total.checked_add(scaled_nanos(number, unit_nanos)?)?;
        rest = tail;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

/// `number` (decimal, optional fraction) times `unit_nanos`, truncated to
/// whole nanoseconds.
fn scaled_nanos(number: &str, unit_nanos: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut nanos = whole_value.checked_mul(unit_nanos)?;

    // Digits past the 18th cannot move the result by a full nanosecond.
    if !frac.is_empty() {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = &frac[..frac.len().min(18)];
        let numerator = digits.parse::<u128>().ok()?;
        let denominator = 10u128.pow(digits.len() as u32);
        nanos = nanos.checked_add(numerator * unit_nanos / denominator)?;
    }
    Some(nanos)
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_nanos() != 0 || secs == 0 {
        format!("{}ms", d.as_millis())
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid duration {raw:?}")))
    }
}
