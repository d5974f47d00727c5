//! Error type shared by every storage driver.

use thiserror::Error;

/// Errors surfaced by `chatstore` components.
///
/// Per the store's error-handling policy, most of these are logged and
/// swallowed at the ingest/GC boundary rather than propagated to callers;
/// `StoreError` exists for the few paths (database open, explicit query
/// plumbing) where a caller does need to observe failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying relational engine reported an error.
    #[error("storage engine error: {0}")]
    Engine(String),

    /// A payload or tag map failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The supplied configuration was invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A retention cycle was aborted because the write lock could not be
    /// acquired within the bounded retry budget.
    #[error("write lock unavailable after retry budget exhausted")]
    WriteLockTimeout,
}

/// Convenience alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;
