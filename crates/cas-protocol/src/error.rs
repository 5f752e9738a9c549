//! Protocol-level error types.

use thiserror::Error;

use crate::codes;

/// Errors reported by a [`Transport`](crate::Transport) or
/// [`Session`](crate::Session).
///
/// The driver core only interprets the class of an error; everything else
/// is passed through to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The socket was closed, reset or failed mid-request.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The broker discarded the prepared plan; the statement must be
    /// prepared again.
    #[error("statement plan invalidated by server")]
    PlanInvalidated,

    /// The request did not complete within its query timeout.
    #[error("query timeout expired")]
    QueryTimeout,

    /// The connection attempt did not complete within the login timeout.
    #[error("login timeout expired")]
    LoginTimeout,

    /// The broker could not be reached.
    #[error("cannot connect to {host}:{port}: {reason}")]
    Connect {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Failure description.
        reason: String,
    },

    /// The server rejected the request.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// The server does not know the statement handle.
    #[error("unknown server statement handle {0}")]
    UnknownStatement(u32),

    /// No further result set is available.
    #[error("no more results")]
    NoMoreResults,

    /// The LOB locator is not valid on this session.
    #[error("invalid LOB locator")]
    InvalidLob,
}

impl ProtocolError {
    /// Check whether this is a communication failure.
    ///
    /// Communication failures tear down the session and make the core
    /// attempt a reconnect.
    #[must_use]
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }

    /// Check whether this is a plan invalidation.
    #[must_use]
    pub fn is_plan_invalidated(&self) -> bool {
        matches!(self, Self::PlanInvalidated)
    }

    /// Check whether this error denotes an expired budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::QueryTimeout | Self::LoginTimeout)
    }

    /// Get the numeric error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Communication(_) => codes::ER_COMMUNICATION,
            Self::PlanInvalidated => codes::CAS_ER_STMT_POOLING,
            Self::QueryTimeout => codes::ER_QUERY_TIMEOUT,
            Self::LoginTimeout => codes::ER_LOGIN_TIMEOUT,
            Self::Connect { .. } => codes::ER_CONNECT,
            Self::Server { code, .. } => *code,
            Self::UnknownStatement(_) => codes::CAS_ER_SRV_HANDLE,
            Self::NoMoreResults => codes::ER_NO_MORE_DATA,
            Self::InvalidLob => codes::ER_INVALID_LOB_HANDLE,
        }
    }
}
