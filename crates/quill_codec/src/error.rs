//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while validating, serializing, or deserializing
/// values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A field name violates the naming rules.
    #[error("invalid field name: {key:?} (must not start with '$' or contain '.')")]
    InvalidKey {
        /// The offending field name.
        key: String,
    },

    /// The input line is not valid JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CodecError {
    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }
}
