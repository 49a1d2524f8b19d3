//! Domain types for the provider state store.
//!
//! A `ProviderRecord` is the persisted form of a registered service
//! provider, including the health fields owned by the health monitor.
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a provider (UUID string).
pub type ProviderId = String;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

// ── Health ────────────────────────────────────────────────────────

/// Health status as determined by liveness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The provider answers its health endpoint and accepts requests.
    #[default]
    Ready,
    /// The provider failed enough consecutive probes to be taken out of rotation.
    NotReady,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ready => "ready",
            HealthStatus::NotReady => "not_ready",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Provider ──────────────────────────────────────────────────────

/// A registered service provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRecord {
    pub id: ProviderId,
    /// Globally unique, human-readable name.
    pub name: String,
    /// Service type implemented by this provider (e.g. "vm").
    pub service_type: String,
    /// Version of the service type schema the provider speaks.
    pub schema_version: String,
    /// Base URL used for proxying and liveness probes.
    pub endpoint: String,
    pub health_status: HealthStatus,
    /// Failed probes since the last successful one.
    pub consecutive_failures: u32,
    /// When the next probe is due. `None` means immediately.
    pub next_health_check: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProviderRecord {
    /// Whether the provider should be probed in a scan started at `now`.
    ///
    /// The boundary is inclusive: a check scheduled exactly at `now` is due.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.next_health_check {
            None => true,
            Some(next) => next <= now,
        }
    }

    /// Whether the provider may receive new resource requests.
    pub fn is_ready(&self) -> bool {
        self.health_status == HealthStatus::Ready
    }
}

/// Registry-owned fields of a provider, used for registration and updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewProvider {
    /// Explicit id to register under. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProviderId>,
    pub name: String,
    pub service_type: String,
    pub schema_version: String,
    pub endpoint: String,
}

impl NewProvider {
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        schema_version: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            service_type: service_type.into(),
            schema_version: schema_version.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Register under a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Whether a registration created a provider or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Registered,
    Updated,
}

/// Current wall-clock time in Unix milliseconds.
pub fn epoch_millis() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(next: Option<Timestamp>) -> ProviderRecord {
        ProviderRecord {
            id: "p-1".to_string(),
            name: "vm-provider".to_string(),
            service_type: "vm".to_string(),
            schema_version: "v1alpha1".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            health_status: HealthStatus::Ready,
            consecutive_failures: 0,
            next_health_check: next,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn never_checked_is_due() {
        assert!(record(None).is_due(5_000));
    }

    #[test]
    fn due_boundary_is_inclusive() {
        assert!(record(Some(5_000)).is_due(5_000));
        assert!(record(Some(4_999)).is_due(5_000));
        assert!(!record(Some(5_001)).is_due(5_000));
    }

    #[test]
    fn health_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::NotReady).unwrap(),
            "\"not_ready\""
        );
        assert_eq!(HealthStatus::Ready.to_string(), "ready");
        assert_eq!(HealthStatus::default(), HealthStatus::Ready);
    }
}
