//! Numeric error codes.
//!
//! Driver-side codes live in the `-20000` range and broker-side codes in the
//! `-10000` range. Callers that only need the numeric pair (for example to
//! fill a C-style error buffer) use these through `Error::code()`.

/// Server (DBMS) error; the server code is carried separately.
pub const ER_DBMS: i32 = -20001;
/// Unknown connection handle.
pub const ER_CON_HANDLE: i32 = -20002;
/// Communication failure with the broker.
pub const ER_COMMUNICATION: i32 = -20004;
/// Cursor moved past the result.
pub const ER_NO_MORE_DATA: i32 = -20005;
/// Unknown transaction type.
pub const ER_TRAN_TYPE: i32 = -20006;
/// Invalid string argument.
pub const ER_STRING_PARAM: i32 = -20007;
/// Value conversion failed.
pub const ER_TYPE_CONVERSION: i32 = -20008;
/// Bind index out of range.
pub const ER_BIND_INDEX: i32 = -20009;
/// Unknown session parameter.
pub const ER_PARAM_NAME: i32 = -20012;
/// Column index out of range.
pub const ER_COLUMN_INDEX: i32 = -20013;
/// Cannot connect to the broker.
pub const ER_CONNECT: i32 = -20016;
/// Unknown request handle.
pub const ER_REQ_HANDLE: i32 = -20018;
/// Invalid cursor position.
pub const ER_INVALID_CURSOR_POS: i32 = -20019;
/// Array bind size not set or inconsistent.
pub const ER_BIND_ARRAY_SIZE: i32 = -20024;
/// Unknown isolation level.
pub const ER_ISOLATION_LEVEL: i32 = -20025;
/// Invalid savepoint command or name.
pub const ER_SAVEPOINT_CMD: i32 = -20028;
/// Background execution still running.
pub const ER_THREAD_RUNNING: i32 = -20029;
/// Malformed connection URL.
pub const ER_INVALID_URL: i32 = -20030;
/// LOB read position beyond the end.
pub const ER_INVALID_LOB_READ_POS: i32 = -20031;
/// Invalid LOB locator.
pub const ER_INVALID_LOB_HANDLE: i32 = -20032;
/// Required datasource property missing.
pub const ER_NO_PROPERTY: i32 = -20033;
/// Datasource property has the wrong type.
pub const ER_PROPERTY_TYPE: i32 = -20034;
/// Datasource is closed or invalid.
pub const ER_INVALID_DATASOURCE: i32 = -20035;
/// No datasource connection became available in time.
pub const ER_DATASOURCE_TIMEOUT: i32 = -20036;
/// Login budget exhausted.
pub const ER_LOGIN_TIMEOUT: i32 = -20038;
/// Query budget exhausted.
pub const ER_QUERY_TIMEOUT: i32 = -20039;

/// Broker-side communication failure.
pub const CAS_ER_COMMUNICATION: i32 = -10003;
/// Broker-side unknown statement handle.
pub const CAS_ER_SRV_HANDLE: i32 = -10006;
/// Broker reports the cached statement plan is no longer valid.
pub const CAS_ER_STMT_POOLING: i32 = -10102;
/// Broker lost its database server.
pub const CAS_ER_DBSERVER_DISCONNECTED: i32 = -10103;

/// Check whether a numeric code denotes a communication failure.
#[must_use]
pub fn is_communication(code: i32) -> bool {
    code == ER_COMMUNICATION || code == CAS_ER_COMMUNICATION
}
