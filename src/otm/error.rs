//! Transaction error types.

use thiserror::Error;

use crate::locking::LockingError;
use crate::state::PersistenceError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A lock could not be acquired.
    #[error("locking error: {0}")]
    Locking(#[from] LockingError),

    /// A DML statement failed during flush.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The object was never registered with the transaction.
    #[error("object not registered: {0}")]
    NotRegistered(String),

    /// The object is already registered with the transaction.
    #[error("object already registered: {0}")]
    AlreadyRegistered(String),

    /// Invalid operation for the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl TransactionError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Locking(e) => e.is_retryable(),
            _ => false,
        }
    }
}
