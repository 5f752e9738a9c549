//! In-process mock broker.
//!
//! The mock keeps every session's server handles, so a statement prepared on
//! one session is unknown to the next: exactly the situation the driver has
//! to recover from after a reconnect.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cas_protocol::message::BatchOutcome;
use cas_protocol::{
    CancelTarget, ColumnInfo, ConnectRequest, DbParameter, ExecuteOutcome, ExecuteRequest,
    HostAddr, LobKind, LobLocator, PrepareFlags, PrepareInfo, ProtocolError, SavepointCommand,
    SchemaType, Session, SessionInfo, StatementKind, TransactionEnd, Transport,
};
use cas_types::Value;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Server error code reported for a cancelled request.
pub const QUERY_CANCELLED: i32 = -1083;

/// Operations that can be counted and scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Opening a session.
    Connect,
    /// Liveness probe.
    CheckLiveness,
    /// Prepare.
    Prepare,
    /// Execute.
    Execute,
    /// Array execute.
    ExecuteArray,
    /// Batch execute.
    ExecuteBatch,
    /// Fetch.
    Fetch,
    /// Next result set.
    NextResult,
    /// Statement close.
    CloseStatement,
    /// Commit or rollback.
    EndTransaction,
    /// Parameter read.
    GetDbParameter,
    /// Parameter write.
    SetDbParameter,
    /// Schema information.
    SchemaInfo,
    /// Savepoint.
    Savepoint,
    /// Version query.
    DbVersion,
    /// LOB creation.
    LobNew,
    /// LOB chunk write.
    LobWrite,
    /// LOB chunk read.
    LobRead,
    /// Session reset.
    EndSession,
    /// Graceful close.
    Close,
}

/// Canned result for one SQL text.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    /// Result columns.
    pub columns: Vec<ColumnInfo>,
    /// Result rows.
    pub rows: Vec<Vec<Value>>,
    /// Affected rows reported for DML.
    pub affected: i64,
}

impl MockResult {
    /// A query result.
    pub fn rows(columns: Vec<ColumnInfo>, rows: Vec<Vec<Value>>) -> Self {
        let affected = i64::try_from(rows.len()).unwrap_or(i64::MAX);
        Self {
            columns,
            rows,
            affected,
        }
    }

    /// A DML result.
    pub fn affected(affected: i64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct State {
    down: HashSet<HostAddr>,
    faults: HashMap<Op, VecDeque<ProtocolError>>,
    calls: HashMap<Op, usize>,
    connect_attempts: Vec<ConnectRequest>,
    connects: HashMap<HostAddr, usize>,
    live_sessions: HashMap<u64, HostAddr>,
    next_pid: i32,
    next_session: u64,
    next_handle: u32,
    next_lob: u32,
    handles: HashMap<(u64, u32), String>,
    results: HashMap<String, MockResult>,
    prepares: Vec<String>,
    executed: Vec<(String, Vec<Value>)>,
    commits: usize,
    rollbacks: usize,
    cancels: Vec<CancelTarget>,
    params: HashMap<DbParameter, i32>,
    param_sets: Vec<(DbParameter, i32)>,
    savepoints: Vec<(SavepointCommand, String)>,
    lobs: HashMap<Bytes, Vec<u8>>,
    execute_delay: Option<Duration>,
    connect_delay: Option<Duration>,
    max_sessions: Option<usize>,
    pconnect: bool,
    server_autocommit: bool,
    in_flight: usize,
    max_in_flight: usize,
    version: String,
}

struct Inner {
    state: Mutex<State>,
    cancel: Notify,
}

/// A scriptable in-process broker.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<Inner>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// Create a broker with every host up and server autocommit on.
    #[must_use]
    pub fn new() -> Self {
        let state = State {
            next_pid: 4000,
            server_autocommit: true,
            version: "11.2.0.0001".to_string(),
            ..State::default()
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                cancel: Notify::new(),
            }),
        }
    }

    /// Get a transport connected to this broker.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(MockTransport {
            server: self.clone(),
        })
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Take a host down (refusing connects, killing its sessions) or up.
    pub fn set_host_down(&self, addr: &HostAddr, down: bool) {
        let mut st = self.inner.state.lock();
        if down {
            st.down.insert(addr.clone());
            st.live_sessions.retain(|_, host| host != addr);
        } else {
            st.down.remove(addr);
        }
    }

    /// Kill every open session; the next request on each fails with a
    /// communication error.
    pub fn kill_sessions(&self) {
        self.inner.state.lock().live_sessions.clear();
    }

    /// Make the next call of `op` fail with `error`.
    ///
    /// A communication error also kills the session it was raised on.
    pub fn fail_next(&self, op: Op, error: ProtocolError) {
        self.inner
            .state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Serve `result` for statements prepared from `sql`.
    pub fn set_result(&self, sql: impl Into<String>, result: MockResult) {
        self.inner.state.lock().results.insert(sql.into(), result);
    }

    /// Make every execute take `delay`.
    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().execute_delay = delay;
    }

    /// Make every connect take `delay`.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.inner.state.lock().connect_delay = delay;
    }

    /// Refuse connects once `max` sessions are alive, as a broker with no
    /// free CAS process does.
    pub fn set_max_sessions(&self, max: Option<usize>) {
        self.inner.state.lock().max_sessions = max;
    }

    /// Report `pconnect` in new sessions.
    pub fn set_pconnect(&self, enabled: bool) {
        self.inner.state.lock().pconnect = enabled;
    }

    /// Server-side autocommit reported in new sessions.
    pub fn set_server_autocommit(&self, enabled: bool) {
        self.inner.state.lock().server_autocommit = enabled;
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Number of times `op` was requested, including failed attempts.
    #[must_use]
    pub fn calls(&self, op: Op) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Successful sessions opened on `addr`.
    #[must_use]
    pub fn connects_to(&self, addr: &HostAddr) -> usize {
        self.inner
            .state
            .lock()
            .connects
            .get(addr)
            .copied()
            .unwrap_or(0)
    }

    /// Successful sessions opened on any host.
    #[must_use]
    pub fn total_connects(&self) -> usize {
        self.inner.state.lock().connects.values().sum()
    }

    /// Every connect request received, in order.
    #[must_use]
    pub fn connect_attempts(&self) -> Vec<ConnectRequest> {
        self.inner.state.lock().connect_attempts.clone()
    }

    /// Successful prepares of `sql`.
    #[must_use]
    pub fn prepare_count(&self, sql: &str) -> usize {
        self.inner
            .state
            .lock()
            .prepares
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }

    /// Every statement executed, with its parameters.
    #[must_use]
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.inner.state.lock().executed.clone()
    }

    /// Commits received.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.inner.state.lock().commits
    }

    /// Rollbacks received.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.inner.state.lock().rollbacks
    }

    /// Cancel requests received.
    #[must_use]
    pub fn cancels(&self) -> Vec<CancelTarget> {
        self.inner.state.lock().cancels.clone()
    }

    /// Last value written for a session parameter.
    #[must_use]
    pub fn db_parameter(&self, param: DbParameter) -> Option<i32> {
        self.inner.state.lock().params.get(&param).copied()
    }

    /// Every parameter write, in order.
    #[must_use]
    pub fn parameter_writes(&self) -> Vec<(DbParameter, i32)> {
        self.inner.state.lock().param_sets.clone()
    }

    /// Every savepoint request, in order.
    #[must_use]
    pub fn savepoints(&self) -> Vec<(SavepointCommand, String)> {
        self.inner.state.lock().savepoints.clone()
    }

    /// Sessions currently alive.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.inner.state.lock().live_sessions.len()
    }

    /// Highest number of executes observed running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.inner.state.lock().max_in_flight
    }

    /// Current content of a large object.
    #[must_use]
    pub fn lob_content(&self, lob: &LobLocator) -> Option<Vec<u8>> {
        self.inner.state.lock().lobs.get(&lob.handle).cloned()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn enter(&self, session_id: u64, op: Op) -> Result<(), ProtocolError> {
        let mut st = self.inner.state.lock();
        *st.calls.entry(op).or_default() += 1;

        if !st.live_sessions.contains_key(&session_id) {
            return Err(ProtocolError::Communication(
                "connection reset by peer".to_string(),
            ));
        }

        if let Some(err) = st.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            if err.is_communication() {
                st.live_sessions.remove(&session_id);
            }
            return Err(err);
        }

        Ok(())
    }

    fn statement_sql(&self, session_id: u64, handle: u32) -> Result<String, ProtocolError> {
        self.inner
            .state
            .lock()
            .handles
            .get(&(session_id, handle))
            .cloned()
            .ok_or(ProtocolError::UnknownStatement(handle))
    }

    async fn pause(
        &self,
        delay: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        let Some(delay) = delay else {
            return Ok(());
        };
        let cancelled = self.inner.cancel.notified();

        let (wait, outcome) = match timeout {
            Some(limit) if limit < delay => (limit, Err(ProtocolError::QueryTimeout)),
            _ => (delay, Ok(())),
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => outcome,
            _ = cancelled => Err(ProtocolError::Server {
                code: QUERY_CANCELLED,
                message: "query cancelled".to_string(),
            }),
        }
    }

    fn result_for(&self, sql: &str) -> MockResult {
        self.inner
            .state
            .lock()
            .results
            .get(sql)
            .cloned()
            .unwrap_or_else(|| MockResult::affected(1))
    }
}

fn classify(sql: &str) -> StatementKind {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match keyword.as_str() {
        "select" | "with" => StatementKind::Select,
        "insert" => StatementKind::Insert,
        "update" => StatementKind::Update,
        "delete" => StatementKind::Delete,
        "call" => StatementKind::Call,
        _ => StatementKind::Other,
    }
}

/// [`Transport`] backed by a [`MockServer`].
pub struct MockTransport {
    server: MockServer,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Session>, ProtocolError> {
        let (delay, fault) = {
            let mut st = self.server.inner.state.lock();
            *st.calls.entry(Op::Connect).or_default() += 1;
            st.connect_attempts.push(request.clone());
            let fault = st
                .faults
                .get_mut(&Op::Connect)
                .and_then(VecDeque::pop_front);
            (st.connect_delay, fault)
        };

        if let Some(err) = fault {
            return Err(err);
        }

        if let Some(delay) = delay {
            match request.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    return Err(ProtocolError::LoginTimeout);
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        let mut st = self.server.inner.state.lock();
        if st.down.contains(&request.addr) {
            return Err(ProtocolError::Connect {
                host: request.addr.host.clone(),
                port: request.addr.port,
                reason: "connection refused".to_string(),
            });
        }
        if st
            .max_sessions
            .is_some_and(|max| st.live_sessions.len() >= max)
        {
            return Err(ProtocolError::Connect {
                host: request.addr.host.clone(),
                port: request.addr.port,
                reason: "no free CAS process".to_string(),
            });
        }

        st.next_session += 1;
        st.next_pid += 1;
        let info = SessionInfo {
            cas_pid: st.next_pid,
            session_id: st.next_session,
            autocommit: st.server_autocommit,
            pconnect: st.pconnect,
        };
        *st.connects.entry(request.addr.clone()).or_default() += 1;
        st.live_sessions
            .insert(info.session_id, request.addr.clone());

        tracing::trace!(addr = %request.addr, session_id = info.session_id, "mock session opened");

        Ok(Box::new(MockSession {
            server: self.server.clone(),
            info,
        }))
    }

    async fn cancel(&self, target: &CancelTarget) -> Result<(), ProtocolError> {
        self.server.inner.state.lock().cancels.push(target.clone());
        self.server.inner.cancel.notify_waiters();
        Ok(())
    }
}

struct MockSession {
    server: MockServer,
    info: SessionInfo,
}

impl MockSession {
    fn sid(&self) -> u64 {
        self.info.session_id
    }

    fn new_handle(&self, sql: String) -> u32 {
        let mut st = self.server.inner.state.lock();
        st.next_handle += 1;
        let handle = st.next_handle;
        st.handles.insert((self.sid(), handle), sql);
        handle
    }
}

#[async_trait]
impl Session for MockSession {
    fn info(&self) -> &SessionInfo {
        &self.info
    }

    async fn check_liveness(&mut self) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::CheckLiveness)
    }

    async fn prepare(
        &mut self,
        sql: &str,
        _flags: PrepareFlags,
    ) -> Result<PrepareInfo, ProtocolError> {
        self.server.enter(self.sid(), Op::Prepare)?;

        let server_handle = self.new_handle(sql.to_string());
        let columns = self.server.result_for(sql).columns;
        self.server.inner.state.lock().prepares.push(sql.to_string());

        Ok(PrepareInfo {
            server_handle,
            kind: classify(sql),
            bind_count: sql.matches('?').count(),
            columns,
        })
    }

    async fn execute(&mut self, request: ExecuteRequest) -> Result<ExecuteOutcome, ProtocolError> {
        self.server.enter(self.sid(), Op::Execute)?;
        let sql = self.server.statement_sql(self.sid(), request.server_handle)?;

        let delay = {
            let mut st = self.server.inner.state.lock();
            st.in_flight += 1;
            st.max_in_flight = st.max_in_flight.max(st.in_flight);
            st.execute_delay
        };
        let waited = self.server.pause(delay, request.timeout).await;
        self.server.inner.state.lock().in_flight -= 1;
        waited?;

        let result = self.server.result_for(&sql);
        let mut st = self.server.inner.state.lock();
        st.executed.push((sql.clone(), request.params));

        let row_count = classify(&sql)
            .has_result_set()
            .then_some(result.rows.len());
        Ok(ExecuteOutcome {
            affected_rows: result.affected,
            row_count,
            out_params: Vec::new(),
            more_results: false,
        })
    }

    async fn execute_array(
        &mut self,
        server_handle: u32,
        rows: Vec<Vec<Value>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<BatchOutcome>, ProtocolError> {
        self.server.enter(self.sid(), Op::ExecuteArray)?;
        let sql = self.server.statement_sql(self.sid(), server_handle)?;
        let delay = self.server.inner.state.lock().execute_delay;
        self.server.pause(delay, timeout).await?;

        let affected = self.server.result_for(&sql).affected;
        let mut st = self.server.inner.state.lock();
        let outcomes = rows
            .into_iter()
            .map(|params| {
                st.executed.push((sql.clone(), params));
                BatchOutcome::Affected(affected)
            })
            .collect();
        Ok(outcomes)
    }

    async fn execute_batch(
        &mut self,
        sql: &[String],
        timeout: Option<Duration>,
    ) -> Result<Vec<BatchOutcome>, ProtocolError> {
        self.server.enter(self.sid(), Op::ExecuteBatch)?;
        let delay = self.server.inner.state.lock().execute_delay;
        self.server.pause(delay, timeout).await?;

        let mut outcomes = Vec::with_capacity(sql.len());
        for text in sql {
            let affected = self.server.result_for(text).affected;
            self.server
                .inner
                .state
                .lock()
                .executed
                .push((text.clone(), Vec::new()));
            outcomes.push(BatchOutcome::Affected(affected));
        }
        Ok(outcomes)
    }

    async fn fetch(
        &mut self,
        server_handle: u32,
        start: usize,
        count: usize,
    ) -> Result<Vec<Vec<Value>>, ProtocolError> {
        self.server.enter(self.sid(), Op::Fetch)?;
        let sql = self.server.statement_sql(self.sid(), server_handle)?;
        let rows = self.server.result_for(&sql).rows;

        let from = start.saturating_sub(1).min(rows.len());
        let to = from.saturating_add(count).min(rows.len());
        Ok(rows[from..to].to_vec())
    }

    async fn next_result(&mut self, server_handle: u32) -> Result<ExecuteOutcome, ProtocolError> {
        self.server.enter(self.sid(), Op::NextResult)?;
        self.server.statement_sql(self.sid(), server_handle)?;
        Err(ProtocolError::NoMoreResults)
    }

    async fn close_statement(&mut self, server_handle: u32) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::CloseStatement)?;
        self.server
            .inner
            .state
            .lock()
            .handles
            .remove(&(self.sid(), server_handle));
        Ok(())
    }

    async fn end_transaction(&mut self, end: TransactionEnd) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::EndTransaction)?;
        let mut st = self.server.inner.state.lock();
        match end {
            TransactionEnd::Commit => st.commits += 1,
            TransactionEnd::Rollback => st.rollbacks += 1,
        }
        Ok(())
    }

    async fn get_db_parameter(&mut self, param: DbParameter) -> Result<i32, ProtocolError> {
        self.server.enter(self.sid(), Op::GetDbParameter)?;
        let st = self.server.inner.state.lock();
        let value = st.params.get(&param).copied().unwrap_or(match param {
            DbParameter::IsolationLevel => 4,
            DbParameter::LockTimeout => -1,
            DbParameter::MaxStringLength => 1_073_741_823,
            DbParameter::AutoCommit => i32::from(st.server_autocommit),
        });
        Ok(value)
    }

    async fn set_db_parameter(
        &mut self,
        param: DbParameter,
        value: i32,
    ) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::SetDbParameter)?;
        let mut st = self.server.inner.state.lock();
        st.params.insert(param, value);
        st.param_sets.push((param, value));
        Ok(())
    }

    async fn schema_info(
        &mut self,
        kind: SchemaType,
        name: Option<&str>,
    ) -> Result<(PrepareInfo, usize), ProtocolError> {
        self.server.enter(self.sid(), Op::SchemaInfo)?;
        let key = format!("schema:{kind:?}:{}", name.unwrap_or("%"));
        let result = self.server.result_for(&key);
        let server_handle = self.new_handle(key);

        let info = PrepareInfo {
            server_handle,
            kind: StatementKind::SchemaInfo,
            bind_count: 0,
            columns: result.columns,
        };
        Ok((info, result.rows.len()))
    }

    async fn savepoint(
        &mut self,
        cmd: SavepointCommand,
        name: &str,
    ) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::Savepoint)?;
        self.server
            .inner
            .state
            .lock()
            .savepoints
            .push((cmd, name.to_string()));
        Ok(())
    }

    async fn db_version(&mut self) -> Result<String, ProtocolError> {
        self.server.enter(self.sid(), Op::DbVersion)?;
        Ok(self.server.inner.state.lock().version.clone())
    }

    async fn lob_new(&mut self, kind: LobKind) -> Result<LobLocator, ProtocolError> {
        self.server.enter(self.sid(), Op::LobNew)?;
        let mut st = self.server.inner.state.lock();
        st.next_lob += 1;
        let handle = Bytes::from(format!("lob-{}", st.next_lob));
        st.lobs.insert(handle.clone(), Vec::new());
        Ok(LobLocator {
            kind,
            size: 0,
            handle,
        })
    }

    async fn lob_write(
        &mut self,
        lob: &LobLocator,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, ProtocolError> {
        self.server.enter(self.sid(), Op::LobWrite)?;
        let mut st = self.server.inner.state.lock();
        let content = st.lobs.get_mut(&lob.handle).ok_or(ProtocolError::InvalidLob)?;

        let start = usize::try_from(offset).map_err(|_| ProtocolError::InvalidLob)?;
        let end = start + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn lob_read(
        &mut self,
        lob: &LobLocator,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, ProtocolError> {
        self.server.enter(self.sid(), Op::LobRead)?;
        let st = self.server.inner.state.lock();
        let content = st.lobs.get(&lob.handle).ok_or(ProtocolError::InvalidLob)?;

        let start = usize::try_from(offset)
            .map_err(|_| ProtocolError::InvalidLob)?
            .min(content.len());
        let end = start.saturating_add(len).min(content.len());
        Ok(Bytes::copy_from_slice(&content[start..end]))
    }

    async fn end_session(&mut self) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::EndSession)
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.server.enter(self.sid(), Op::Close)?;
        let sid = self.sid();
        let mut st = self.server.inner.state.lock();
        st.live_sessions.remove(&sid);
        st.handles.retain(|(session, _), _| *session != sid);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(host: &str) -> ConnectRequest {
        ConnectRequest {
            addr: HostAddr::new(host, 33000),
            database: "demodb".into(),
            user: "dba".into(),
            password: String::new(),
            retry: true,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_handles_do_not_survive_reconnect() {
        let server = MockServer::new();
        let transport = server.transport();

        let mut first = transport.connect(&request("a")).await.unwrap();
        let info = first.prepare("SELECT 1", PrepareFlags::empty()).await.unwrap();

        let mut second = transport.connect(&request("a")).await.unwrap();
        let err = second
            .execute(ExecuteRequest {
                server_handle: info.server_handle,
                flags: Default::default(),
                params: Vec::new(),
                max_rows: None,
                autocommit: true,
                timeout: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::UnknownStatement(info.server_handle));
    }

    #[tokio::test]
    async fn test_communication_fault_kills_session() {
        let server = MockServer::new();
        let mut session = server.transport().connect(&request("a")).await.unwrap();

        server.fail_next(Op::Prepare, ProtocolError::Communication("reset".into()));
        assert!(session.prepare("SELECT 1", PrepareFlags::empty()).await.is_err());
        assert!(session.check_liveness().await.unwrap_err().is_communication());
        assert_eq!(server.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_down_host_refuses() {
        let server = MockServer::new();
        server.set_host_down(&HostAddr::new("a", 33000), true);
        let err = server.transport().connect(&request("a")).await.err().unwrap();
        assert!(matches!(err, ProtocolError::Connect { .. }));
        assert_eq!(server.calls(Op::Connect), 1);
        assert_eq!(server.total_connects(), 0);
    }
}
