//! redb table definitions for the provider state store.
//!
//! Each table uses `&str` keys. Provider records are stored as JSON bytes.

use redb::TableDefinition;

/// Provider records keyed by `{provider_id}`.
pub const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");

/// Unique name index: `{provider_name}` → `{provider_id}`.
pub const PROVIDER_NAMES: TableDefinition<&str, &str> = TableDefinition::new("provider_names");
