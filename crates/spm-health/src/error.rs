//! Error types for health-check configuration and prober setup.

use thiserror::Error;

/// Result type alias for health subsystem setup.
pub type HealthResult<T> = Result<T, HealthError>;

/// Errors raised while configuring the health monitor.
///
/// Probe failures are never errors; they are reported as unhealthy results.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration { key: String, value: String },

    #[error("invalid number for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("invalid health check config: {0}")]
    InvalidConfig(String),

    #[error("tls setup failed: {0}")]
    Tls(String),
}
