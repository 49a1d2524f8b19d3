//! StateStore — redb-backed provider persistence.
//!
//! Provides the registry operations over provider records and implements
//! [`ProviderDirectory`] for the health monitor. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::debug;
use uuid::Uuid;

use crate::directory::ProviderDirectory;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Registry ───────────────────────────────────────────────────

    /// Register a new provider.
    ///
    /// The record starts `Ready` with no failures and no scheduled check,
    /// so the next monitor scan probes it immediately. Fails with
    /// `NameTaken` or `IdTaken` if either is already in use.
    pub fn create_provider(&self, new: &NewProvider) -> StateResult<ProviderRecord> {
        validate(new)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut names = txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
            if names
                .get(new.name.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::NameTaken(new.name.clone()));
            }
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            record = insert_new(&mut providers, &mut names, new)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %record.id, name = %record.name, "provider registered");
        Ok(record)
    }

    /// Idempotent registration keyed by name.
    ///
    /// If the name is unknown a new provider is created, under the requested
    /// id or a generated one; a requested id that already exists is an
    /// `IdTaken` conflict. If the name is known, the existing provider's
    /// service type, schema version and endpoint are replaced and its health
    /// fields are kept; a requested id that differs from the existing one is
    /// a `NameTaken` conflict.
    pub fn register_or_update(
        &self,
        new: &NewProvider,
    ) -> StateResult<(ProviderRecord, Registration)> {
        validate(new)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut names = txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let existing_id = names
                .get(new.name.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());

            outcome = match existing_id {
                Some(existing_id) => {
                    if new.id.as_ref().is_some_and(|id| *id != existing_id) {
                        return Err(StateError::NameTaken(new.name.clone()));
                    }
                    let bytes = providers
                        .get(existing_id.as_str())
                        .map_err(map_err!(Read))?
                        .map(|guard| guard.value().to_vec())
                        .ok_or_else(|| StateError::NotFound(existing_id.clone()))?;
                    let mut record = decode(&bytes)?;
                    record.service_type = new.service_type.clone();
                    record.schema_version = new.schema_version.clone();
                    record.endpoint = new.endpoint.clone();
                    record.updated_at = epoch_millis();

                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    providers
                        .insert(existing_id.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    (record, Registration::Updated)
                }
                None => (
                    insert_new(&mut providers, &mut names, new)?,
                    Registration::Registered,
                ),
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let (record, registration) = &outcome;
        debug!(
            id = %record.id,
            name = %record.name,
            ?registration,
            "provider registration applied"
        );
        Ok(outcome)
    }

    /// Get a provider by id.
    pub fn get_provider(&self, id: &str) -> StateResult<Option<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a provider by its unique name.
    pub fn get_provider_by_name(&self, name: &str) -> StateResult<Option<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let names = txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
        let id = match names.get(name).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        match providers.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List providers, optionally restricted to one service type.
    ///
    /// Results are ordered by creation time, then id.
    pub fn list_providers(&self, service_type: Option<&str>) -> StateResult<Vec<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record = decode(value.value())?;
            if service_type.is_none_or(|t| record.service_type == t) {
                results.push(record);
            }
        }
        results.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(results)
    }

    /// Update the registry fields of a provider.
    ///
    /// Health fields are left untouched; they belong to the health monitor.
    /// Any `id` on `update` is ignored.
    pub fn update_provider(&self, id: &str, update: &NewProvider) -> StateResult<ProviderRecord> {
        validate(update)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let existing = providers
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(existing) = existing else {
                return Err(StateError::NotFound(id.to_string()));
            };
            let mut updated = decode(&existing)?;

            if updated.name != update.name {
                let mut names = txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
                let owner = names
                    .get(update.name.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                if owner.is_some_and(|owner| owner != id) {
                    return Err(StateError::NameTaken(update.name.clone()));
                }
                names
                    .remove(updated.name.as_str())
                    .map_err(map_err!(Write))?;
                names
                    .insert(update.name.as_str(), id)
                    .map_err(map_err!(Write))?;
            }

            updated.name = update.name.clone();
            updated.service_type = update.service_type.clone();
            updated.schema_version = update.schema_version.clone();
            updated.endpoint = update.endpoint.clone();
            updated.updated_at = epoch_millis();

            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            providers
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            record = updated;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, name = %record.name, "provider updated");
        Ok(record)
    }

    /// Delete a provider by id. Returns true if it existed.
    pub fn delete_provider(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            removed = providers
                .remove(id)
                .map_err(map_err!(Write))?
                .map(|guard| guard.value().to_vec());
            if let Some(bytes) = &removed {
                let record = decode(bytes)?;
                let mut names = txn.open_table(PROVIDER_NAMES).map_err(map_err!(Table))?;
                names
                    .remove(record.name.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let existed = removed.is_some();
        debug!(%id, existed, "provider deleted");
        Ok(existed)
    }
}

// ── Health ─────────────────────────────────────────────────────────

impl ProviderDirectory for StateStore {
    fn list_due_for_health_check(&self, now: Timestamp) -> StateResult<Vec<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record = decode(value.value())?;
            if record.is_due(now) {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn update_health_status(
        &self,
        id: &str,
        status: HealthStatus,
        consecutive_failures: u32,
        next_health_check: Timestamp,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
            let existing = providers
                .get(id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(existing) = existing else {
                return Err(StateError::NotFound(id.to_string()));
            };
            let mut record = decode(&existing)?;
            record.health_status = status;
            record.consecutive_failures = consecutive_failures;
            record.next_health_check = Some(next_health_check);

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            providers
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

/// Insert a fresh record for `new`, whose name is known to be free.
fn insert_new(
    providers: &mut Table<'_, &'static str, &'static [u8]>,
    names: &mut Table<'_, &'static str, &'static str>,
    new: &NewProvider,
) -> StateResult<ProviderRecord> {
    let id = new
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if providers.get(id.as_str()).map_err(map_err!(Read))?.is_some() {
        return Err(StateError::IdTaken(id));
    }

    let now = epoch_millis();
    let record = ProviderRecord {
        id,
        name: new.name.clone(),
        service_type: new.service_type.clone(),
        schema_version: new.schema_version.clone(),
        endpoint: new.endpoint.clone(),
        health_status: HealthStatus::Ready,
        consecutive_failures: 0,
        next_health_check: None,
        created_at: now,
        updated_at: now,
    };
    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
    providers
        .insert(record.id.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    names
        .insert(record.name.as_str(), record.id.as_str())
        .map_err(map_err!(Write))?;
    Ok(record)
}

fn decode(bytes: &[u8]) -> StateResult<ProviderRecord> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn validate(provider: &NewProvider) -> StateResult<()> {
    if provider.name.trim().is_empty() {
        return Err(StateError::Invalid("name must not be empty".to_string()));
    }
    if provider.endpoint.trim().is_empty() {
        return Err(StateError::Invalid("endpoint must not be empty".to_string()));
    }
    Ok(())
}
