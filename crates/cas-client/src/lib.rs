//! # cas-client
//!
//! Async client core for CUBRID CAS brokers.
//!
//! This crate owns everything between the public driver API and the wire:
//! handle bookkeeping, per-connection exclusivity, transaction status,
//! reconnect and failover across alternate hosts, timeouts, and the
//! prepared statement cache. The wire itself is reached through the
//! [`Transport`] and [`Session`] traits of `cas-protocol`.
//!
//! ## Features
//!
//! - **Generation-checked handles**: a freed id never resolves to a reused
//!   slot
//! - **One operation per connection**: callers queue on an async lock
//! - **Failover**: the last used host first, then every alternate, within
//!   the login timeout; automatic return to the primary after `rc_time`
//! - **Transparent recovery**: a lost session outside a transaction is
//!   reconnected and the request replayed once
//! - **Statement cache**: per connection, LRU bounded
//!
//! ## Example
//!
//! ```rust,ignore
//! use cas_client::{CursorOrigin, Driver, ExecuteFlags, PrepareFlags};
//!
//! let driver = Driver::new(transport);
//! let conn = driver
//!     .connect_url("cci:cubrid:localhost:33000:demodb:dba::", "", "")
//!     .await?;
//!
//! let stmt = driver
//!     .prepare(conn, "select name from athlete where code = ?", PrepareFlags::empty())
//!     .await?;
//! driver.bind_param(stmt, 1, &10999i32).await?;
//! driver.execute(stmt, ExecuteFlags::empty()).await?;
//!
//! driver.cursor(stmt, 1, CursorOrigin::First).await?;
//! let row = driver.fetch_row(stmt).await?;
//! let name: String = row.get(0)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
mod failover;
pub mod instrumentation;
pub mod lob;
pub mod query;
pub mod registry;
pub mod row;
pub mod state;
mod statement;
mod statement_cache;

// Re-export commonly used types
pub use cas_protocol::{
    BatchOutcome, ColumnInfo, CursorOrigin, DbParameter, ExecuteFlags, IsolationLevel, LobKind,
    LobLocator, PrepareFlags, SavepointCommand, SchemaType, Session, SessionInfo, StatementKind,
    TransactionEnd, Transport,
};
pub use cas_types::{FromValue, ToValue, Value, ValueType};
pub use client::Driver;
pub use config::Config;
pub use connection::ConnectionOwner;
pub use error::{Error, ErrorInfo, Result};
pub use lob::LOB_IO_LENGTH;
pub use query::MAX_REPREPARE_ATTEMPTS;
pub use registry::{ConnectionId, HandleId, StatementId};
pub use row::Row;
pub use state::ConnectionStatus;
pub use statement::DEFAULT_FETCH_SIZE;
