//! spm-state — provider directory for the service provider manager.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage of registered service providers together with their health
//! bookkeeping (status, consecutive failures, next check time).
//!
//! # Architecture
//!
//! Provider records are JSON-serialized into redb's `&[u8]` value column,
//! keyed by provider id. A second table maps unique provider names to ids.
//!
//! The health monitor only sees the store through [`ProviderDirectory`],
//! which exposes the due-set query and the atomic health update. Registry
//! operations (create, update, delete) live on [`StateStore`] itself and
//! never touch the health fields.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod directory;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use directory::ProviderDirectory;
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
