//! # cas-protocol
//!
//! The boundary between the driver core and a CAS broker.
//!
//! This crate does not encode bytes. It defines what the core asks of the
//! wire layer ([`Transport`] and [`Session`]), the request and response
//! shapes exchanged across that boundary, and the error classification the
//! core relies on to decide between reconnect, re-prepare and surfacing an
//! error.
//!
//! ## Error classes
//!
//! | Class | Core reaction |
//! |-------|---------------|
//! | [`ProtocolError::Communication`] | drop the session, reconnect, replay once |
//! | [`ProtocolError::PlanInvalidated`] | re-prepare the statement and retry |
//! | [`ProtocolError::QueryTimeout`] | surface, optionally drop the session |
//! | everything else | surface unchanged |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codes;
pub mod error;
pub mod flags;
pub mod message;
pub mod session;

pub use error::ProtocolError;
pub use flags::{ExecuteFlags, PrepareFlags};
pub use message::{
    BatchOutcome, CancelTarget, ColumnInfo, ConnectRequest, CursorOrigin, DbParameter, ExecuteOutcome,
    ExecuteRequest, HostAddr, IsolationLevel, LobKind, LobLocator, PrepareInfo, SavepointCommand,
    SchemaType, SessionInfo, StatementKind, TransactionEnd,
};
pub use session::{Session, Transport};
