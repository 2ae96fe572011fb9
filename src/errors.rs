//! Crate-internal error types.
//!
//! Per spec.md §7, nothing in the core throws to callers — these types exist
//! so the persistence module can log a specific cause before swallowing the
//! failure.

use thiserror::Error;

/// Failures from the snapshot persistence path (spec.md §4.3, §7). Every
/// call site logs this and continues; it never propagates to the
/// dispatcher or adapter.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
