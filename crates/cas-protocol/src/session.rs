//! Transport and session traits.
//!
//! The driver core is written against these traits. A production transport
//! speaks the broker wire protocol over TCP; the `cas-testing` crate
//! provides an in-process implementation with fault injection.
//!
//! Both traits use `#[async_trait]` because the core stores sessions as
//! `Box<dyn Session>` and transports as `Arc<dyn Transport>`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cas_types::Value;

use crate::error::ProtocolError;
use crate::flags::PrepareFlags;
use crate::message::{
    BatchOutcome, CancelTarget, ConnectRequest, DbParameter, ExecuteOutcome, ExecuteRequest,
    LobKind, LobLocator, PrepareInfo, SavepointCommand, SchemaType, SessionInfo, TransactionEnd,
};

/// Opens sessions and delivers out-of-band cancel requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session on the requested broker.
    ///
    /// Implementations must give up once `request.timeout` has elapsed and
    /// report [`ProtocolError::LoginTimeout`] or
    /// [`ProtocolError::QueryTimeout`].
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>, ProtocolError>;

    /// Ask the broker to cancel whatever the target worker is running.
    async fn cancel(&self, target: &CancelTarget) -> Result<(), ProtocolError>;
}

/// One established broker session.
///
/// A session never retries on its own; error classification and recovery
/// belong to the caller.
#[async_trait]
pub trait Session: Send + Sync {
    /// Metadata recorded when the session was opened.
    fn info(&self) -> &SessionInfo;

    /// Verify the socket still reaches a live broker worker.
    async fn check_liveness(&mut self) -> Result<(), ProtocolError>;

    /// Prepare a statement.
    async fn prepare(&mut self, sql: &str, flags: PrepareFlags)
    -> Result<PrepareInfo, ProtocolError>;

    /// Execute a prepared statement.
    async fn execute(&mut self, request: ExecuteRequest) -> Result<ExecuteOutcome, ProtocolError>;

    /// Execute a prepared statement once per parameter row.
    async fn execute_array(
        &mut self,
        server_handle: u32,
        rows: Vec<Vec<Value>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<BatchOutcome>, ProtocolError>;

    /// Execute several SQL texts in one request.
    async fn execute_batch(
        &mut self,
        sql: &[String],
        timeout: Option<Duration>,
    ) -> Result<Vec<BatchOutcome>, ProtocolError>;

    /// Fetch `count` rows starting at 1-based row `start`.
    async fn fetch(
        &mut self,
        server_handle: u32,
        start: usize,
        count: usize,
    ) -> Result<Vec<Vec<Value>>, ProtocolError>;

    /// Advance to the next result set of a multi-statement execution.
    async fn next_result(&mut self, server_handle: u32) -> Result<ExecuteOutcome, ProtocolError>;

    /// Release a server-side statement handle.
    async fn close_statement(&mut self, server_handle: u32) -> Result<(), ProtocolError>;

    /// Commit or roll back the current transaction.
    async fn end_transaction(&mut self, end: TransactionEnd) -> Result<(), ProtocolError>;

    /// Read a session parameter.
    async fn get_db_parameter(&mut self, param: DbParameter) -> Result<i32, ProtocolError>;

    /// Change a session parameter.
    async fn set_db_parameter(
        &mut self,
        param: DbParameter,
        value: i32,
    ) -> Result<(), ProtocolError>;

    /// Open a schema information result; returns its metadata and row count.
    async fn schema_info(
        &mut self,
        kind: SchemaType,
        name: Option<&str>,
    ) -> Result<(PrepareInfo, usize), ProtocolError>;

    /// Create or roll back to a savepoint.
    async fn savepoint(&mut self, cmd: SavepointCommand, name: &str)
    -> Result<(), ProtocolError>;

    /// Server version string.
    async fn db_version(&mut self) -> Result<String, ProtocolError>;

    /// Create an empty large object.
    async fn lob_new(&mut self, kind: LobKind) -> Result<LobLocator, ProtocolError>;

    /// Write one chunk into a large object; returns the bytes written.
    async fn lob_write(
        &mut self,
        lob: &LobLocator,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, ProtocolError>;

    /// Read one chunk from a large object.
    async fn lob_read(
        &mut self,
        lob: &LobLocator,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, ProtocolError>;

    /// Discard server session state (session variables, prepared plans).
    async fn end_session(&mut self) -> Result<(), ProtocolError>;

    /// Close the session gracefully.
    async fn close(&mut self) -> Result<(), ProtocolError>;
}
