//! Error types for the cluster state store.

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

    /// Another writer holds the lease. Retried by the store.
    #[error("lease already present on {0}")]
    LeaseHeld(String),

    #[error("failed to acquire lease on {resource} after {attempts} attempts")]
    LeaseExhausted { resource: String, attempts: u32 },

    /// The presented lease is not the one currently held (expired or stolen).
    #[error("lease mismatch on {0}")]
    LeaseMismatch(String),

    #[error("state {0} does not exist")]
    NotInitialized(String),

    #[error("cluster is not clusterized yet")]
    NotClusterized,
}
