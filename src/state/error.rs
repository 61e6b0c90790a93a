//! Persistence error types.

use thiserror::Error;

use crate::batch::BatchError;
use crate::metadata::MetadataError;

/// Result type for state actions and broker calls.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors raised while writing objects to the database.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A DML statement failed.
    #[error("{operation} failed for {identity}: {reason}")]
    Dml {
        operation: &'static str,
        identity: String,
        reason: String,
    },

    /// Statement batching failed.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Class metadata could not be resolved.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl PersistenceError {
    /// Create a DML failure.
    pub fn dml(
        operation: &'static str,
        identity: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Dml {
            operation,
            identity: identity.into(),
            reason: reason.into(),
        }
    }
}
