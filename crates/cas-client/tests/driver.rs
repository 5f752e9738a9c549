//! Driver operations against the in-process mock broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use cas_client::{
    Config, ConnectionStatus, CursorOrigin, DbParameter, Driver, Error, ExecuteFlags,
    IsolationLevel, LOB_IO_LENGTH, LobKind, PrepareFlags, SavepointCommand, SchemaType,
    StatementKind, TransactionEnd, Value, ValueType,
};
use cas_protocol::{ColumnInfo, ProtocolError};
use cas_testing::{MockResult, MockServer, Op};
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn config() -> Config {
    Config::new()
        .host("db1")
        .port(33000)
        .database("demodb")
        .credentials("dba", "")
}

fn athletes() -> MockResult {
    MockResult::rows(
        vec![
            ColumnInfo::new("code", ValueType::Int),
            ColumnInfo::new("name", ValueType::String),
        ],
        vec![
            vec![Value::Int(1), Value::String("Kim".into())],
            vec![Value::Int(2), Value::String("Lee".into())],
            vec![Value::Int(3), Value::Null],
        ],
    )
}

// =============================================================================
// Connect / Disconnect
// =============================================================================

#[tokio::test]
async fn test_connect_and_disconnect() {
    init_tracing();
    let server = MockServer::new();
    let driver = Driver::new(server.transport());

    let conn = driver.connect(config()).await.unwrap();
    assert_eq!(driver.connection_count(), 1);
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::OutOfTransaction
    );
    let info = driver.session_info(conn).await.unwrap().unwrap();
    assert_eq!(info.cas_pid, 4001);

    assert_ok!(driver.disconnect(conn).await);
    assert_eq!(driver.connection_count(), 0);
    assert_eq!(server.live_sessions(), 0);
    assert!(matches!(
        driver.status(conn).await,
        Err(Error::ConnectionNotFound(id)) if id == conn
    ));
}

#[tokio::test]
async fn test_failed_connect_leaves_no_handle() {
    let server = MockServer::new();
    server.set_host_down(&config().primary(), true);
    let driver = Driver::new(server.transport());

    let err = driver.connect(config()).await.unwrap_err();
    assert!(matches!(err, Error::Connect { .. }));
    assert_eq!(driver.connection_count(), 0);
}

#[tokio::test]
async fn test_connect_url() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());

    let conn = driver
        .connect_url("cci:cubrid:db1:33000:demodb:dba::?autocommit=false", "", "")
        .await
        .unwrap();
    assert!(!driver.autocommit(conn).await.unwrap());
    assert_eq!(server.connect_attempts()[0].user, "dba");

    let err = driver
        .connect_url("cci:cubrid:db1:33000:demodb:::?unknownopt=1", "dba", "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}

#[tokio::test]
async fn test_server_autocommit_adopted_when_unset() {
    let server = MockServer::new();
    server.set_server_autocommit(false);
    let driver = Driver::new(server.transport());

    let conn = driver.connect(config()).await.unwrap();
    assert!(!driver.autocommit(conn).await.unwrap());

    let conn = driver.connect(config().autocommit(true)).await.unwrap();
    assert!(driver.autocommit(conn).await.unwrap());
}

// =============================================================================
// Statements
// =============================================================================

#[tokio::test]
async fn test_prepare_execute_fetch() {
    let server = MockServer::new();
    let sql = "select code, name from athlete";
    server.set_result(sql, athletes());
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();
    assert_eq!(
        driver.statement_kind(stmt).await.unwrap(),
        StatementKind::Select
    );
    assert_eq!(driver.result_info(stmt).await.unwrap().len(), 2);
    assert_eq!(driver.execute(stmt, ExecuteFlags::empty()).await.unwrap(), 3);
    assert_eq!(driver.row_count(stmt).await.unwrap(), 3);

    driver.cursor(stmt, 1, CursorOrigin::First).await.unwrap();
    let row = driver.fetch_row(stmt).await.unwrap();
    assert_eq!(row.get::<i32>(0).unwrap(), 1);
    assert_eq!(row.get_by_name::<String>("NAME").unwrap(), "Kim");

    driver.cursor(stmt, 1, CursorOrigin::Current).await.unwrap();
    driver.fetch(stmt).await.unwrap();
    assert_eq!(driver.get_data::<i64>(stmt, 1).await.unwrap(), 2);
    assert_eq!(server.calls(Op::Fetch), 1);

    driver.cursor(stmt, 1, CursorOrigin::Last).await.unwrap();
    driver.fetch(stmt).await.unwrap();
    assert_eq!(
        driver.get_data::<Option<String>>(stmt, 2).await.unwrap(),
        None
    );
    assert!(matches!(
        driver.get_data::<i32>(stmt, 3).await,
        Err(Error::ColumnIndex { index: 3, count: 2 })
    ));

    assert!(matches!(
        driver.cursor(stmt, 4, CursorOrigin::First).await,
        Err(Error::NoMoreData)
    ));
    assert!(matches!(driver.next_result(stmt).await, Err(Error::NoMoreData)));
}

#[tokio::test]
async fn test_fetch_size_limits_round_trip() {
    let server = MockServer::new();
    let sql = "select code, name from athlete";
    server.set_result(sql, athletes());
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();

    driver.set_fetch_size(stmt, 2).await.unwrap();
    assert_eq!(driver.fetch_size(stmt).await.unwrap(), 2);
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();

    for position in 1..=3 {
        driver
            .cursor(stmt, position, CursorOrigin::First)
            .await
            .unwrap();
        driver.fetch(stmt).await.unwrap();
    }
    assert_eq!(server.calls(Op::Fetch), 2);

    driver.set_fetch_size(stmt, 0).await.unwrap();
    assert_eq!(
        driver.fetch_size(stmt).await.unwrap(),
        cas_client::DEFAULT_FETCH_SIZE
    );
}

#[tokio::test]
async fn test_max_rows_caps_result() {
    let server = MockServer::new();
    let sql = "select code, name from athlete";
    server.set_result(sql, athletes());
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();

    driver.set_max_rows(stmt, Some(2)).await.unwrap();
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(driver.row_count(stmt).await.unwrap(), 2);
    assert!(driver.cursor(stmt, 3, CursorOrigin::First).await.is_err());
}

#[tokio::test]
async fn test_bind_parameters() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let sql = "insert into athlete values (?, ?)";
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();

    assert!(matches!(
        driver.bind_param(stmt, 3, &1i32).await,
        Err(Error::BindIndex { index: 3, count: 2 })
    ));
    driver.bind_param(stmt, 1, &7i32).await.unwrap();
    assert!(matches!(
        driver.execute(stmt, ExecuteFlags::empty()).await,
        Err(Error::UnboundParameter { index: 2 })
    ));

    driver.bind_param(stmt, 2, "Park").await.unwrap();
    assert_eq!(driver.execute(stmt, ExecuteFlags::empty()).await.unwrap(), 1);
    assert_eq!(
        server.executed().last().unwrap(),
        &(
            sql.to_string(),
            vec![Value::Int(7), Value::String("Park".into())]
        )
    );
}

#[tokio::test]
async fn test_execute_array() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let stmt = driver
        .prepare(conn, "insert into t values (?)", PrepareFlags::empty())
        .await
        .unwrap();

    assert!(matches!(
        driver.bind_param_array(stmt, 1, vec![Value::Int(1)]).await,
        Err(Error::BindArraySize(_))
    ));
    driver.bind_param_array_size(stmt, 3).await.unwrap();
    driver
        .bind_param_array(stmt, 1, vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        .await
        .unwrap();

    let outcomes = driver.execute_array(stmt).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(server.executed().len(), 3);
}

#[tokio::test]
async fn test_query_timeout_accessors() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let five = Some(Duration::from_secs(5));
    let conn = driver.connect(config().query_timeout(five)).await.unwrap();
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();

    assert_eq!(driver.query_timeout(stmt).await.unwrap(), five);
    assert_eq!(driver.set_query_timeout(stmt, None).await.unwrap(), five);
    assert_eq!(driver.query_timeout(stmt).await.unwrap(), None);
}

#[tokio::test]
async fn test_close_statement_frees_handle() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();

    driver.close_statement(stmt).await.unwrap();
    assert_eq!(driver.statement_count(), 0);
    assert_eq!(server.calls(Op::CloseStatement), 1);
    assert!(matches!(
        driver.execute(stmt, ExecuteFlags::empty()).await,
        Err(Error::StatementNotFound(id)) if id == stmt
    ));
}

#[tokio::test]
async fn test_statements_die_with_connection() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();

    driver.disconnect(conn).await.unwrap();
    assert_eq!(driver.statement_count(), 0);
    assert!(matches!(
        driver.fetch(stmt).await,
        Err(Error::StatementNotFound(_))
    ));

    let conn2 = driver.connect(config()).await.unwrap();
    let stmt2 = driver
        .prepare(conn2, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    assert_ne!(conn, conn2);
    assert_ne!(stmt, stmt2);
    assert!(matches!(
        driver.status(conn).await,
        Err(Error::ConnectionNotFound(_))
    ));
}

// =============================================================================
// Statement Cache
// =============================================================================

#[tokio::test]
async fn test_statement_cache_returns_existing_handle() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver
        .connect(config().statement_pool(true))
        .await
        .unwrap();

    let a = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    let b = driver
        .prepare(conn, "  select 1 ", PrepareFlags::empty())
        .await
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(server.calls(Op::Prepare), 1);

    // Cached statements survive close.
    driver.close_statement(a).await.unwrap();
    assert_eq!(driver.statement_count(), 1);
    assert_eq!(server.calls(Op::CloseStatement), 0);
    driver.execute(a, ExecuteFlags::empty()).await.unwrap();
}

#[tokio::test]
async fn test_cache_disabled_prepares_every_time() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    let a = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    let b = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(server.prepare_count("select 1"), 2);
}

#[tokio::test]
async fn test_evicted_statement_becomes_closable() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver
        .connect(config().statement_pool(true).statement_cache_size(1))
        .await
        .unwrap();

    let a = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    let _b = driver
        .prepare(conn, "select 2", PrepareFlags::empty())
        .await
        .unwrap();

    driver.close_statement(a).await.unwrap();
    assert_eq!(driver.statement_count(), 1);

    let again = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    assert_ne!(again, a);
    assert_eq!(server.prepare_count("select 1"), 2);
}

// =============================================================================
// Transactions and Session Settings
// =============================================================================

#[tokio::test]
async fn test_manual_commit_tracks_transaction() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config().autocommit(false)).await.unwrap();
    let stmt = driver
        .prepare(conn, "delete from t", PrepareFlags::empty())
        .await
        .unwrap();

    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::InTransaction
    );

    driver.end_tran(conn, TransactionEnd::Commit).await.unwrap();
    assert_eq!(server.commits(), 1);
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::OutOfTransaction
    );

    // Nothing pending: no round trip.
    driver.end_tran(conn, TransactionEnd::Rollback).await.unwrap();
    assert_eq!(server.rollbacks(), 0);
    assert_eq!(server.calls(Op::EndTransaction), 1);
}

#[tokio::test]
async fn test_enabling_autocommit_commits_pending_work() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config().autocommit(false)).await.unwrap();
    let stmt = driver
        .prepare(conn, "update t set a = 1", PrepareFlags::empty())
        .await
        .unwrap();
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();

    driver.set_autocommit(conn, true).await.unwrap();
    assert_eq!(server.commits(), 1);
    assert!(driver.autocommit(conn).await.unwrap());

    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::OutOfTransaction
    );
}

#[tokio::test]
async fn test_isolation_level_reapplied_after_reconnect() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    driver
        .set_isolation_level(conn, IsolationLevel::Serializable)
        .await
        .unwrap();
    assert_eq!(
        driver.isolation_level(conn).await.unwrap(),
        IsolationLevel::Serializable
    );

    server.kill_sessions();
    driver.db_version(conn).await.unwrap();
    assert_eq!(server.total_connects(), 2);
    assert_eq!(
        server.parameter_writes(),
        vec![
            (DbParameter::IsolationLevel, IsolationLevel::Serializable.code()),
            (DbParameter::IsolationLevel, IsolationLevel::Serializable.code()),
        ]
    );
}

#[tokio::test]
async fn test_db_parameters() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    driver
        .set_db_parameter(conn, DbParameter::LockTimeout, 30)
        .await
        .unwrap();
    assert_eq!(
        driver
            .get_db_parameter(conn, DbParameter::LockTimeout)
            .await
            .unwrap(),
        30
    );
    assert_eq!(server.db_parameter(DbParameter::LockTimeout), Some(30));
}

#[tokio::test]
async fn test_savepoint_names_validated() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    assert!(matches!(
        driver
            .savepoint(conn, SavepointCommand::Create, "sp; drop table t")
            .await,
        Err(Error::InvalidIdentifier(_))
    ));
    driver
        .savepoint(conn, SavepointCommand::Create, "sp1")
        .await
        .unwrap();
    driver
        .savepoint(conn, SavepointCommand::Rollback, "sp1")
        .await
        .unwrap();
    assert_eq!(
        server.savepoints(),
        vec![
            (SavepointCommand::Create, "sp1".to_string()),
            (SavepointCommand::Rollback, "sp1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_savepoint_without_session_is_noop() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    server.fail_next(
        Op::DbVersion,
        ProtocolError::Communication("reset".into()),
    );
    assert_err!(driver.db_version(conn).await);
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::Disconnected
    );

    assert_ok!(
        driver
            .savepoint(conn, SavepointCommand::Create, "sp1")
            .await
    );
    assert_eq!(server.calls(Op::Savepoint), 0);
}

// =============================================================================
// Connection-level Requests
// =============================================================================

#[tokio::test]
async fn test_execute_batch() {
    let server = MockServer::new();
    server.set_result("delete from t", MockResult::affected(4));
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config().autocommit(false)).await.unwrap();

    let outcomes = driver
        .execute_batch(conn, &["insert into t values (1)", "delete from t"])
        .await
        .unwrap();
    assert_eq!(
        outcomes,
        vec![
            cas_client::BatchOutcome::Affected(1),
            cas_client::BatchOutcome::Affected(4)
        ]
    );
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::InTransaction
    );
}

#[tokio::test]
async fn test_schema_info_is_fetchable() {
    let server = MockServer::new();
    server.set_result(
        "schema:Class:%",
        MockResult::rows(
            vec![ColumnInfo::new("name", ValueType::String)],
            vec![
                vec![Value::String("athlete".into())],
                vec![Value::String("game".into())],
            ],
        ),
    );
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    let stmt = driver
        .schema_info(conn, SchemaType::Class, None)
        .await
        .unwrap();
    assert_eq!(
        driver.statement_kind(stmt).await.unwrap(),
        StatementKind::SchemaInfo
    );
    assert_eq!(driver.row_count(stmt).await.unwrap(), 2);

    driver.cursor(stmt, 2, CursorOrigin::First).await.unwrap();
    driver.fetch(stmt).await.unwrap();
    assert_eq!(driver.get_data::<String>(stmt, 1).await.unwrap(), "game");

    driver.close_statement(stmt).await.unwrap();
    assert_eq!(driver.statement_count(), 0);
}

#[tokio::test]
async fn test_db_version() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    assert_eq!(driver.db_version(conn).await.unwrap(), "11.2.0.0001");
}

// =============================================================================
// LOBs
// =============================================================================

#[tokio::test]
async fn test_lob_round_trip_in_chunks() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    let data: Vec<u8> = (0..(2 * LOB_IO_LENGTH + 1000))
        .map(|i| (i % 251) as u8)
        .collect();
    let mut lob = driver.lob_new(conn, LobKind::Blob).await.unwrap();
    let written = driver.lob_write(conn, &mut lob, 0, &data).await.unwrap();
    assert_eq!(written, data.len());
    assert_eq!(lob.size, data.len() as u64);
    assert_eq!(server.calls(Op::LobWrite), 3);
    assert_eq!(server.lob_content(&lob).unwrap(), data);

    let read = driver.lob_read(conn, &lob, 0, data.len()).await.unwrap();
    assert_eq!(read.as_ref(), data.as_slice());
    assert_eq!(server.calls(Op::LobRead), 3);

    let tail = driver.lob_read(conn, &lob, lob.size - 10, 100).await.unwrap();
    assert_eq!(tail.len(), 10);
}

#[tokio::test]
async fn test_lob_read_past_end() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    let mut lob = driver.lob_new(conn, LobKind::Clob).await.unwrap();
    driver.lob_write(conn, &mut lob, 0, b"hello").await.unwrap();

    assert!(matches!(
        driver.lob_read(conn, &lob, 5, 1).await,
        Err(Error::InvalidLobReadPosition { offset: 5, size: 5 })
    ));
    assert_eq!(server.calls(Op::LobRead), 0);
}
