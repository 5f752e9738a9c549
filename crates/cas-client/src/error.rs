//! Client error types.
//!
//! Every public operation returns [`Result`]. Callers that need the numeric
//! `(code, message)` pair of the C client API use [`Error::code`] or
//! [`ErrorInfo`].

use cas_protocol::{ProtocolError, codes};
use cas_types::TypeError;
use thiserror::Error;

use crate::registry::{ConnectionId, StatementId};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during client operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection id does not resolve (never issued, or already freed).
    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// The statement id does not resolve.
    #[error("statement {0} not found")]
    StatementNotFound(StatementId),

    /// Communication with the broker failed and could not be recovered.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The server kept invalidating the statement plan.
    #[error("statement plan invalidated by server")]
    PlanInvalidated,

    /// The login budget was exhausted.
    #[error("login timeout expired")]
    LoginTimeout,

    /// The query budget was exhausted.
    #[error("query timeout expired")]
    QueryTimeout,

    /// No broker could be reached.
    #[error("cannot connect to {host}:{port}: {reason}")]
    Connect {
        /// Last host tried.
        host: String,
        /// Last port tried.
        port: u16,
        /// Failure description.
        reason: String,
    },

    /// Malformed connection URL.
    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bind index outside `1..=count`.
    #[error("bind index {index} out of range, statement has {count} parameters")]
    BindIndex {
        /// Requested 1-based index.
        index: usize,
        /// Number of parameter markers.
        count: usize,
    },

    /// A parameter marker has no value.
    #[error("parameter {index} is not bound")]
    UnboundParameter {
        /// 1-based index of the unbound parameter.
        index: usize,
    },

    /// Array binding size not set or inconsistent.
    #[error("array bind size mismatch: {0}")]
    BindArraySize(String),

    /// Column index outside `1..=count`.
    #[error("column index {index} out of range, result has {count} columns")]
    ColumnIndex {
        /// Requested 1-based index.
        index: usize,
        /// Number of result columns.
        count: usize,
    },

    /// Cursor moved outside the result, or no further result set exists.
    #[error("no more data")]
    NoMoreData,

    /// No row has been fetched at the current cursor position.
    #[error("no row fetched at the current cursor position")]
    InvalidCursorPosition,

    /// A background execution has not completed yet.
    #[error("background execution still running")]
    StillRunning,

    /// No background execution was started on the connection.
    #[error("no background execution pending")]
    NoPendingExecution,

    /// A background execution task failed to complete.
    #[error("background execution aborted: {0}")]
    Background(String),

    /// Invalid identifier (savepoint name).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The server reported an isolation level the driver does not know.
    #[error("unknown isolation level {0}")]
    InvalidIsolationLevel(i32),

    /// LOB read started at or past the end of the object.
    #[error("LOB read position {offset} beyond size {size}")]
    InvalidLobReadPosition {
        /// Requested offset.
        offset: u64,
        /// Current LOB size.
        size: u64,
    },

    /// The LOB locator is not valid.
    #[error("invalid LOB locator")]
    InvalidLob,

    /// Error reported by the server.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// Value conversion failed.
    #[error("type conversion failed: {0}")]
    Type(#[from] TypeError),
}

impl Error {
    /// Get the numeric error code.
    ///
    /// Driver-side errors map to the `-20000` range, server errors keep the
    /// server's own code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnectionNotFound(_) => codes::ER_CON_HANDLE,
            Self::StatementNotFound(_) | Self::NoPendingExecution => codes::ER_REQ_HANDLE,
            Self::Communication(_) => codes::ER_COMMUNICATION,
            Self::PlanInvalidated => codes::CAS_ER_STMT_POOLING,
            Self::LoginTimeout => codes::ER_LOGIN_TIMEOUT,
            Self::QueryTimeout => codes::ER_QUERY_TIMEOUT,
            Self::Connect { .. } => codes::ER_CONNECT,
            Self::InvalidUrl(_) => codes::ER_INVALID_URL,
            Self::Config(_) => codes::ER_STRING_PARAM,
            Self::BindIndex { .. } | Self::UnboundParameter { .. } => codes::ER_BIND_INDEX,
            Self::BindArraySize(_) => codes::ER_BIND_ARRAY_SIZE,
            Self::ColumnIndex { .. } => codes::ER_COLUMN_INDEX,
            Self::NoMoreData => codes::ER_NO_MORE_DATA,
            Self::InvalidCursorPosition => codes::ER_INVALID_CURSOR_POS,
            Self::StillRunning | Self::Background(_) => codes::ER_THREAD_RUNNING,
            Self::InvalidIdentifier(_) => codes::ER_SAVEPOINT_CMD,
            Self::InvalidIsolationLevel(_) => codes::ER_ISOLATION_LEVEL,
            Self::InvalidLobReadPosition { .. } => codes::ER_INVALID_LOB_READ_POS,
            Self::InvalidLob => codes::ER_INVALID_LOB_HANDLE,
            Self::Server { code, .. } => *code,
            Self::Type(_) => codes::ER_TYPE_CONVERSION,
        }
    }

    /// Check whether this is a communication failure.
    #[must_use]
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }

    /// Check whether this error denotes an expired budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LoginTimeout | Self::QueryTimeout)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Communication(msg) => Self::Communication(msg),
            ProtocolError::PlanInvalidated => Self::PlanInvalidated,
            ProtocolError::QueryTimeout => Self::QueryTimeout,
            ProtocolError::LoginTimeout => Self::LoginTimeout,
            ProtocolError::Connect { host, port, reason } => Self::Connect { host, port, reason },
            ProtocolError::Server { code, message } => Self::Server { code, message },
            ProtocolError::NoMoreResults => Self::NoMoreData,
            ProtocolError::InvalidLob => Self::InvalidLob,
            other => Self::Server {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

/// The `(code, message)` pair filled in by every failing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_mapping() {
        let err: Error = ProtocolError::Communication("reset".into()).into();
        assert!(err.is_communication());
        assert_eq!(err.code(), codes::ER_COMMUNICATION);

        let err: Error = ProtocolError::NoMoreResults.into();
        assert!(matches!(err, Error::NoMoreData));

        let err: Error = ProtocolError::UnknownStatement(7).into();
        assert_eq!(err.code(), codes::CAS_ER_SRV_HANDLE);
    }

    #[test]
    fn test_server_code_preserved() {
        let err: Error = ProtocolError::Server {
            code: -670,
            message: "unique constraint".into(),
        }
        .into();
        let info = ErrorInfo::from(&err);
        assert_eq!(info.code, -670);
        assert!(info.message.contains("unique constraint"));
    }

    #[test]
    fn test_timeout_codes() {
        assert_eq!(Error::LoginTimeout.code(), -20038);
        assert_eq!(Error::QueryTimeout.code(), -20039);
        assert!(Error::QueryTimeout.is_timeout());
        assert!(!Error::NoMoreData.is_timeout());
    }
}
