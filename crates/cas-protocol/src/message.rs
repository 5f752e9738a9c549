//! Request and response shapes exchanged with the broker.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use cas_types::{Value, ValueType};

use crate::flags::ExecuteFlags;

/// A broker address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddr {
    /// Hostname or IP address.
    pub host: String,
    /// Broker port.
    pub port: u16,
}

impl HostAddr {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the transport needs to open a session.
#[derive(Clone)]
pub struct ConnectRequest {
    /// Broker to connect to.
    pub addr: HostAddr,
    /// Database name.
    pub database: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Whether the broker should retry internally on its side.
    ///
    /// Cleared when alternate hosts exist so failover happens quickly.
    pub retry: bool,
    /// Remaining login budget, `None` for no limit.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("addr", &self.addr)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Metadata reported by the broker when a session is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Process id of the broker worker serving this session.
    pub cas_pid: i32,
    /// Server session id.
    pub session_id: u64,
    /// Server-side default autocommit mode.
    pub autocommit: bool,
    /// Whether the broker keeps worker processes for reuse (`pconnect`).
    pub pconnect: bool,
}

/// Address of an in-flight request to cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelTarget {
    /// Broker the request runs on.
    pub addr: HostAddr,
    /// Broker worker process id.
    pub cas_pid: i32,
}

/// Kind of a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StatementKind {
    /// SELECT.
    Select,
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
    /// CALL / stored procedure.
    Call,
    /// Schema information request.
    SchemaInfo,
    /// DDL and anything else.
    Other,
}

impl StatementKind {
    /// Check whether statements of this kind produce a result set.
    #[must_use]
    pub fn has_result_set(&self) -> bool {
        matches!(self, Self::Select | Self::Call | Self::SchemaInfo)
    }
}

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column label.
    pub name: String,
    /// Column type.
    pub value_type: ValueType,
    /// Precision.
    pub precision: i32,
    /// Scale.
    pub scale: i16,
    /// Whether NULL values may appear.
    pub nullable: bool,
}

impl ColumnInfo {
    /// Create column metadata with default precision and scale.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            precision: 0,
            scale: 0,
            nullable: true,
        }
    }
}

/// Reply to a prepare request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareInfo {
    /// Server-side statement handle.
    pub server_handle: u32,
    /// Statement kind.
    pub kind: StatementKind,
    /// Number of parameter markers.
    pub bind_count: usize,
    /// Result columns, empty for statements without a result set.
    pub columns: Vec<ColumnInfo>,
}

/// An execute request for a prepared statement.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Server-side statement handle.
    pub server_handle: u32,
    /// Execute options.
    pub flags: ExecuteFlags,
    /// Bound parameter values, in marker order.
    pub params: Vec<Value>,
    /// Maximum rows the result may hold, `None` for unlimited.
    pub max_rows: Option<usize>,
    /// Whether the server should commit after the statement.
    pub autocommit: bool,
    /// Remaining query budget, `None` for no limit.
    pub timeout: Option<Duration>,
}

/// Reply to an execute request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    /// Affected rows for DML, result size for queries.
    pub affected_rows: i64,
    /// Number of rows in the result set, if one was produced.
    pub row_count: Option<usize>,
    /// Output parameter values of a CALL statement.
    pub out_params: Vec<Value>,
    /// Whether further result sets follow.
    pub more_results: bool,
}

/// Per-statement result of a batch or array execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The statement succeeded and affected this many rows.
    Affected(i64),
    /// The statement failed on the server.
    Failed {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },
}

impl BatchOutcome {
    /// Check whether the statement succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Affected(_))
    }
}

/// How a transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEnd {
    /// Make the work durable.
    Commit,
    /// Discard the work.
    Rollback,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
}

impl IsolationLevel {
    /// Get the numeric level sent to the server.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::ReadCommitted => 4,
            Self::RepeatableRead => 5,
            Self::Serializable => 6,
        }
    }

    /// Parse a numeric level reported by the server.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            4 => Some(Self::ReadCommitted),
            5 => Some(Self::RepeatableRead),
            6 => Some(Self::Serializable),
            _ => None,
        }
    }
}

/// Session parameter readable and writable on a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbParameter {
    /// Transaction isolation level.
    IsolationLevel,
    /// Lock wait timeout in milliseconds.
    LockTimeout,
    /// Maximum string length returned to the client.
    MaxStringLength,
    /// Server-side autocommit.
    AutoCommit,
}

/// Kind of schema information to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    /// Classes (tables).
    Class,
    /// Virtual classes (views).
    View,
    /// Attributes (columns) of a class.
    Attribute,
    /// Constraints of a class.
    Constraint,
    /// Primary key of a class.
    PrimaryKey,
    /// Foreign keys referencing other classes.
    ImportedKeys,
    /// Foreign keys referencing this class.
    ExportedKeys,
}

/// Savepoint operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavepointCommand {
    /// Create a savepoint.
    Create,
    /// Roll back to a savepoint.
    Rollback,
}

/// Reference point for cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOrigin {
    /// Relative to the first row.
    First,
    /// Relative to the current row.
    Current,
    /// Relative to the last row.
    Last,
}

/// Large object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    /// Binary.
    Blob,
    /// Character.
    Clob,
}

/// Reference to a server-side large object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// Large object kind.
    pub kind: LobKind,
    /// Current size in bytes.
    pub size: u64,
    /// Opaque server locator.
    pub handle: Bytes,
}
