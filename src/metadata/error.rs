//! Metadata error types.

use thiserror::Error;

/// Result type for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors raised while registering or resolving class descriptors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// No descriptor is registered for the class.
    #[error("no class descriptor found for {0}")]
    ClassNotFound(String),

    /// A descriptor for the class is already registered.
    #[error("class descriptor already registered: {0}")]
    DuplicateClass(String),

    /// The descriptor is structurally invalid.
    #[error("invalid descriptor for {class}: {reason}")]
    InvalidDescriptor { class: String, reason: String },

    /// JSON repository could not be parsed.
    #[error("repository parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl MetadataError {
    pub(crate) fn invalid(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            class: class.into(),
            reason: reason.into(),
        }
    }
}
