//! Reconnect, failover, replay and timeout behaviour.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use cas_client::{
    Config, ConnectionStatus, Driver, Error, ExecuteFlags, MAX_REPREPARE_ATTEMPTS, PrepareFlags,
    TransactionEnd,
};
use cas_protocol::{HostAddr, ProtocolError};
use cas_testing::{MockServer, Op};

fn addr(host: &str) -> HostAddr {
    HostAddr::new(host, 33000)
}

fn config() -> Config {
    Config::new()
        .host("db1")
        .port(33000)
        .database("demodb")
        .credentials("dba", "")
}

fn with_alternates() -> Config {
    config()
        .alternate_host("db2", 33000)
        .alternate_host("db3", 33000)
}

// =============================================================================
// Failover
// =============================================================================

#[tokio::test]
async fn test_failover_walks_alternates_in_order() {
    let server = MockServer::new();
    server.set_host_down(&addr("db1"), true);
    server.set_host_down(&addr("db2"), true);
    let driver = Driver::new(server.transport());

    driver.connect(with_alternates()).await.unwrap();

    let attempts: Vec<HostAddr> = server
        .connect_attempts()
        .into_iter()
        .map(|r| r.addr)
        .collect();
    assert_eq!(attempts, vec![addr("db1"), addr("db2"), addr("db3")]);
    assert!(server.connect_attempts().iter().all(|r| !r.retry));
    assert_eq!(server.connects_to(&addr("db3")), 1);
}

#[tokio::test]
async fn test_reconnect_prefers_last_used_host() {
    let server = MockServer::new();
    server.set_host_down(&addr("db1"), true);
    let driver = Driver::new(server.transport());
    let conn = driver.connect(with_alternates()).await.unwrap();
    assert_eq!(server.connects_to(&addr("db2")), 1);

    server.set_host_down(&addr("db1"), false);
    server.kill_sessions();
    driver.db_version(conn).await.unwrap();

    assert_eq!(server.connects_to(&addr("db2")), 2);
    assert_eq!(server.connects_to(&addr("db1")), 0);
}

#[tokio::test]
async fn test_all_hosts_down_reports_last_error() {
    let server = MockServer::new();
    for host in ["db1", "db2", "db3"] {
        server.set_host_down(&addr(host), true);
    }
    let driver = Driver::new(server.transport());

    match driver.connect(with_alternates()).await {
        Err(Error::Connect { host, .. }) => assert_eq!(host, "db3"),
        other => panic!("expected connect error, got {other:?}"),
    }
    assert_eq!(driver.connection_count(), 0);
}

#[tokio::test]
async fn test_single_host_asks_broker_to_retry() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    driver.connect(config()).await.unwrap();
    assert!(server.connect_attempts()[0].retry);
}

#[tokio::test(start_paused = true)]
async fn test_fail_back_to_primary_after_rc_time() {
    let server = MockServer::new();
    server.set_host_down(&addr("db1"), true);
    let driver = Driver::new(server.transport());
    let conn = driver
        .connect(with_alternates().rc_time(Duration::from_secs(10)))
        .await
        .unwrap();
    server.set_host_down(&addr("db1"), false);

    // Too early: the session stays on the alternate.
    driver.end_tran(conn, TransactionEnd::Commit).await.unwrap();
    driver.db_version(conn).await.unwrap();
    assert_eq!(server.connects_to(&addr("db1")), 0);

    tokio::time::advance(Duration::from_secs(11)).await;
    driver.end_tran(conn, TransactionEnd::Commit).await.unwrap();
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::Disconnected
    );

    driver.db_version(conn).await.unwrap();
    assert_eq!(server.connects_to(&addr("db1")), 1);
}

// =============================================================================
// Replay
// =============================================================================

#[tokio::test]
async fn test_lost_session_replays_with_one_reprepare() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let sql = "update athlete set gender = 'M'";
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();

    server.kill_sessions();
    assert_eq!(driver.execute(stmt, ExecuteFlags::empty()).await.unwrap(), 1);

    assert_eq!(server.prepare_count(sql), 2);
    assert_eq!(server.total_connects(), 2);
    assert_eq!(server.executed().len(), 2);
}

#[tokio::test]
async fn test_prepare_replays_after_lost_session() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();

    server.fail_next(Op::Prepare, ProtocolError::Communication("reset".into()));
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();
    assert_eq!(server.calls(Op::Prepare), 2);
    assert_eq!(server.total_connects(), 2);
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();
}

#[tokio::test]
async fn test_no_replay_inside_transaction() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config().autocommit(false)).await.unwrap();
    let sql = "insert into t values (1)";
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();

    server.kill_sessions();
    let err = driver.execute(stmt, ExecuteFlags::empty()).await.unwrap_err();
    assert!(err.is_communication());
    assert_eq!(server.total_connects(), 1);
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::Disconnected
    );

    // The caller decides; the next operation reconnects.
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(server.total_connects(), 2);
    assert_eq!(server.prepare_count(sql), 2);
}

#[tokio::test]
async fn test_cache_invalidation_is_connection_scoped() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let sql = "select 1";
    let c1 = driver
        .connect(config().statement_pool(true))
        .await
        .unwrap();
    let c2 = driver
        .connect(config().statement_pool(true))
        .await
        .unwrap();
    let s1 = driver.prepare(c1, sql, PrepareFlags::empty()).await.unwrap();
    let s2 = driver.prepare(c2, sql, PrepareFlags::empty()).await.unwrap();
    assert_eq!(server.prepare_count(sql), 2);

    server.fail_next(Op::Execute, ProtocolError::Communication("reset".into()));
    driver.execute(s1, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(server.prepare_count(sql), 3);

    driver.execute(s2, ExecuteFlags::empty()).await.unwrap();
    assert_eq!(server.prepare_count(sql), 3);
    assert_eq!(
        driver.prepare(c1, sql, PrepareFlags::empty()).await.unwrap(),
        s1
    );
}

// =============================================================================
// Plan Invalidation
// =============================================================================

#[tokio::test]
async fn test_invalidated_plan_is_prepared_again() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let sql = "select * from game";
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();

    server.fail_next(Op::Execute, ProtocolError::PlanInvalidated);
    server.fail_next(Op::Execute, ProtocolError::PlanInvalidated);
    driver.execute(stmt, ExecuteFlags::empty()).await.unwrap();

    assert_eq!(server.prepare_count(sql), 3);
    assert_eq!(server.total_connects(), 1);
}

#[tokio::test]
async fn test_reprepare_loop_is_bounded() {
    let server = MockServer::new();
    let driver = Driver::new(server.transport());
    let conn = driver.connect(config()).await.unwrap();
    let sql = "select * from game";
    let stmt = driver.prepare(conn, sql, PrepareFlags::empty()).await.unwrap();

    for _ in 0..=MAX_REPREPARE_ATTEMPTS {
        server.fail_next(Op::Execute, ProtocolError::PlanInvalidated);
    }
    let err = driver.execute(stmt, ExecuteFlags::empty()).await.unwrap_err();
    assert!(matches!(err, Error::PlanInvalidated));
    assert_eq!(
        server.prepare_count(sql),
        1 + MAX_REPREPARE_ATTEMPTS as usize
    );
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_query_timeout_drops_session_when_configured() {
    let server = MockServer::new();
    server.set_execute_delay(Some(Duration::from_secs(1)));
    let driver = Driver::new(server.transport());
    let conn = driver
        .connect(
            config()
                .query_timeout(Some(Duration::from_millis(100)))
                .disconnect_on_query_timeout(true),
        )
        .await
        .unwrap();
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();

    let err = driver.execute(stmt, ExecuteFlags::empty()).await.unwrap_err();
    assert!(matches!(err, Error::QueryTimeout));
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout_keeps_session_by_default() {
    let server = MockServer::new();
    server.set_execute_delay(Some(Duration::from_secs(1)));
    let driver = Driver::new(server.transport());
    let conn = driver
        .connect(config().query_timeout(Some(Duration::from_millis(100))))
        .await
        .unwrap();
    let stmt = driver
        .prepare(conn, "select 1", PrepareFlags::empty())
        .await
        .unwrap();

    let err = driver.execute(stmt, ExecuteFlags::empty()).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        driver.status(conn).await.unwrap(),
        ConnectionStatus::OutOfTransaction
    );
    assert_eq!(server.live_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_login_timeout() {
    let server = MockServer::new();
    server.set_connect_delay(Some(Duration::from_secs(1)));
    let driver = Driver::new(server.transport());

    let err = driver
        .connect(with_alternates().login_timeout(Some(Duration::from_millis(50))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LoginTimeout));
    // The budget is spent on the first host; no further I/O.
    assert_eq!(server.calls(Op::Connect), 1);
    assert_eq!(driver.connection_count(), 0);
}
