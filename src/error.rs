//! Engine error taxonomy

use thiserror::Error;

use crate::platform::AdapterError;

/// Errors surfaced by the trust and enforcement engine.
///
/// None of these is fatal to the process: each one is scoped to the single
/// operation (or reconciliation item) that produced it.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Unknown channel, bot or profile
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// The chat platform rejected or failed an enforcement call
    #[error("Enforcement adapter failure: {0}")]
    AdapterFailure(#[from] AdapterError),

    /// A limits document failed validation; the prior config stays live
    #[error("Limits validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Request shape does not match the action (wrong subject, missing scope)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Persistence substrate failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        WardenError::NotFound { kind, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WardenError::NotFound { .. })
    }
}

/// Result type for engine operations
pub type WardenResult<T> = Result<T, WardenError>;
