//! Error types for the document engine.

use std::io;
use thiserror::Error;

/// Result type for datastore operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors surfaced to datastore callers.
#[derive(Debug, Error)]
pub enum DbError {
    /// Codec error (invalid field name, unparseable record).
    #[error("codec error: {0}")]
    Codec(#[from] quill_codec::CodecError),

    /// Storage adapter error.
    #[error("storage error: {0}")]
    Storage(#[from] quill_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid regular expression in a `$regex` operand.
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Attempted change to a document's `_id`.
    #[error("cannot change a document's _id")]
    ImmutableId,

    /// Unknown update modifier.
    #[error("unknown modifier {name}")]
    UnknownModifier {
        /// The modifier name as written in the update.
        name: String,
    },

    /// Unknown query operator.
    #[error("unknown query operator {name}")]
    UnknownOperator {
        /// The operator name as written in the query.
        name: String,
    },

    /// A modifier or operator was given an operand of the wrong shape.
    #[error("bad operand: {message}")]
    ModifierArgType {
        /// Description of the shape violation.
        message: String,
    },

    /// `$`-prefixed keys and plain field keys mixed at the same level.
    #[error("cannot mix operators and plain fields at the same level")]
    MixedOperators,

    /// A projection mixes inclusion and exclusion of fields.
    #[error("cannot both keep and omit fields in a projection, except for _id")]
    MixedProjection,

    /// An operation targeted a field of the wrong type.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A unique index rejected a duplicate key.
    #[error("unique constraint violated for key {key} on field {field}")]
    UniqueViolation {
        /// The indexed field.
        field: String,
        /// Display form of the duplicate key.
        key: String,
    },

    /// A null (or missing) key was inserted into a unique index.
    #[error("null key on unique index over field {field}")]
    NullKey {
        /// The indexed field.
        field: String,
    },

    /// An array value was used as an index key.
    #[error("array key on index over field {field}")]
    ArrayKey {
        /// The indexed field.
        field: String,
    },

    /// Journal replay exceeded the corruption tolerance.
    #[error("datafile corruption: {corrupt} of {total} records unreadable (threshold {threshold})")]
    Corruption {
        /// Number of unreadable records.
        corrupt: usize,
        /// Total number of records in the journal.
        total: usize,
        /// The configured tolerance ratio.
        threshold: f64,
    },

    /// Only one of the two serialization hooks was configured.
    #[error("serialization hooks must be configured as a pair")]
    HooksMissing,

    /// The configured serialization hooks do not invert each other.
    #[error("serialization hooks are not mutually inverse")]
    HooksNotInverse,

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },

    /// An executor task died before reporting its result.
    #[error("executor task failed before completion")]
    TaskFailed,
}

impl DbError {
    /// Creates an unknown modifier error.
    pub fn unknown_modifier(name: impl Into<String>) -> Self {
        Self::UnknownModifier { name: name.into() }
    }

    /// Creates an unknown query operator error.
    pub fn unknown_operator(name: impl Into<String>) -> Self {
        Self::UnknownOperator { name: name.into() }
    }

    /// Creates a bad operand error.
    pub fn bad_operand(message: impl Into<String>) -> Self {
        Self::ModifierArgType {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Creates a unique violation error.
    pub fn unique_violation(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self::UniqueViolation {
            field: field.into(),
            key: key.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
