//! spm-health — provider liveness checking for the service provider manager.
//!
//! Probes each registered provider's `/health` endpoint, counts consecutive
//! failures, flips providers between `Ready` and `NotReady`, and schedules
//! the next check with exponential backoff while a provider is down.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor (single background task)
//!   ├── tick every `interval` (first scan runs immediately)
//!   ├── ProviderDirectory::list_due_for_health_check(now)
//!   ├── for each due provider, sequentially:
//!   │   ├── Probe::probe(endpoint) → bool
//!   │   ├── evaluate() → status, failures
//!   │   ├── backoff::next_check_time()
//!   │   └── ProviderDirectory::update_health_status()
//!   └── MonitorHandle::shutdown() → stop and join
//! ```
//!
//! # State machine
//!
//! A provider stays `Ready` until `max_consecutive_failures` probes in a row
//! have failed, then becomes `NotReady`. One successful probe restores
//! `Ready` and resets the counter. Ready providers are checked every
//! `interval`; not-ready ones back off from `base_backoff_interval`
//! doubling up to `max_backoff_interval`.

pub mod backoff;
pub mod checker;
pub mod config;
pub mod error;
pub mod monitor;

pub use backoff::{MAX_BACKOFF_EXPONENT, check_delay, next_check_time};
pub use checker::{HttpProber, Probe, ProbeResult, health_url};
pub use config::HealthCheckConfig;
pub use error::{HealthError, HealthResult};
pub use monitor::{HealthMonitor, HealthUpdate, MonitorHandle, ScanReport, evaluate};
