//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur when converting between broker values and Rust types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TypeError {
    /// The value has a different type than the one requested.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type or description.
        actual: String,
    },

    /// A NULL value was read into a non-nullable type.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// The value does not fit in the target type.
    #[error("value out of range for {target}")]
    OutOfRange {
        /// Target type name.
        target: &'static str,
    },

    /// The value could not be parsed.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
