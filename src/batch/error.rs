//! Statement batching errors.

use thiserror::Error;

use crate::metadata::MetadataError;

/// Result type for batching operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors raised by the batch connection layer.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The statement could not be parsed.
    #[error("syntax error: {0}")]
    Parse(String),

    /// The statement parsed but is not a form the batcher understands.
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    /// The driver rejected a statement.
    #[error("execution of `{sql}` failed: {reason}")]
    Execution { sql: String, reason: String },

    /// Parameter indexes are 1-based.
    #[error("invalid parameter index: {0}")]
    ParameterIndex(usize),

    /// The statement was used after `close`.
    #[error("statement is closed")]
    Closed,

    /// Foreign-key metadata could not be resolved.
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl BatchError {
    /// Create an execution failure.
    pub fn execution(sql: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            sql: sql.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlparser::parser::ParserError> for BatchError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        BatchError::Parse(e.to_string())
    }
}
