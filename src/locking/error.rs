//! Locking error types.

use thiserror::Error;

use super::isolation::UnknownIsolationError;
use crate::metadata::MetadataError;
use crate::types::{Identity, TxId};

/// Result type for locking operations.
pub type LockingResult<T> = Result<T, LockingError>;

/// Errors that can occur while acquiring object locks.
#[derive(Debug, Error)]
pub enum LockingError {
    /// Waiting would close a cycle in the waits-for graph.
    #[error("deadlock detected: {tx} waiting for {identity} held by {holders:?}")]
    Deadlock {
        tx: TxId,
        identity: Identity,
        holders: Vec<TxId>,
    },

    /// The lock was not released within the configured wait time.
    #[error("{tx} timed out after {waited_ms}ms waiting for {identity}")]
    Timeout {
        tx: TxId,
        identity: Identity,
        waited_ms: u64,
    },

    /// The lock is held by another transaction and waiting is not allowed.
    #[error("{identity} is locked by {holders:?}, {tx} may not wait")]
    Conflict {
        tx: TxId,
        identity: Identity,
        holders: Vec<TxId>,
    },

    /// The class is configured with an unknown isolation level.
    #[error(transparent)]
    UnknownIsolation(#[from] UnknownIsolationError),

    /// Class metadata could not be resolved.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Failure raised by a collaborator, such as a custom wait strategy.
    #[error("locking failed: {message}")]
    Nested {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LockingError {
    /// Check if retrying the transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockingError::Deadlock { .. }
                | LockingError::Timeout { .. }
                | LockingError::Conflict { .. }
        )
    }

    /// Wrap a collaborator error.
    pub fn nested(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Nested {
            message: message.into(),
            source: Box::new(source),
        }
    }
}
