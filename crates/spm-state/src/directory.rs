//! The narrow view of the store consumed by the health monitor.

use crate::error::StateResult;
use crate::types::{HealthStatus, ProviderRecord, Timestamp};

/// Persistent source of provider health records.
///
/// Implementations must apply `update_health_status` as a single atomic
/// write of all three health fields.
pub trait ProviderDirectory: Send + Sync {
    /// All providers whose `next_health_check` is unset or `<= now`.
    fn list_due_for_health_check(&self, now: Timestamp) -> StateResult<Vec<ProviderRecord>>;

    /// Overwrite the health fields of one provider.
    ///
    /// Returns [`StateError::NotFound`](crate::StateError::NotFound) when the
    /// provider has been deleted in the meantime.
    fn update_health_status(
        &self,
        id: &str,
        status: HealthStatus,
        consecutive_failures: u32,
        next_health_check: Timestamp,
    ) -> StateResult<()>;
}
