//! Error types for the provider state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("provider name already taken: {0}")]
    NameTaken(String),

    #[error("provider id already registered: {0}")]
    IdTaken(String),

    #[error("invalid provider: {0}")]
    Invalid(String),
}

impl StateError {
    /// Whether this error means the provider record no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    /// Whether this error is a name or id clash with another provider.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::NameTaken(_) | StateError::IdTaken(_))
    }
}
