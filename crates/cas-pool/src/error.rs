//! Datasource error types.

use cas_client::ErrorInfo;
use cas_client::error::Error as ClientError;
use cas_protocol::codes;
use thiserror::Error;

/// Errors that can occur during datasource operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No connection became idle within `max_wait`.
    #[error("all connections are in use (waited {waited_ms} ms)")]
    PoolTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The datasource has been destroyed.
    #[error("datasource is invalid or destroyed")]
    InvalidDatasource,

    /// A required property is absent.
    #[error("missing datasource property `{0}`")]
    MissingProperty(&'static str),

    /// A property value does not parse.
    #[error("invalid value for datasource property `{key}`: {value:?}")]
    InvalidProperty {
        /// Property name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// Opening or resetting a connection failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl PoolError {
    /// Get the numeric error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::PoolTimeout { .. } => codes::ER_DATASOURCE_TIMEOUT,
            Self::InvalidDatasource => codes::ER_INVALID_DATASOURCE,
            Self::MissingProperty(_) => codes::ER_NO_PROPERTY,
            Self::InvalidProperty { .. } => codes::ER_PROPERTY_TYPE,
            Self::Client(err) => err.code(),
        }
    }

    /// Check whether waiting longer could have succeeded.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::PoolTimeout { .. } => true,
            Self::Client(err) => err.is_timeout(),
            _ => false,
        }
    }
}

impl From<&PoolError> for ErrorInfo {
    fn from(err: &PoolError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
