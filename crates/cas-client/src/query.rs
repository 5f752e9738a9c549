//! Statement operations and request recovery.
//!
//! Prepare and execute recover from two kinds of failure on their own:
//!
//! - **Lost session.** If the connection was not inside a transaction when
//!   the operation started, it reconnects (failing over if needed) and
//!   replays once. Inside a transaction the error is returned, because the
//!   uncommitted work died with the session.
//! - **Invalidated plan.** The statement is prepared again and re-executed,
//!   at most [`MAX_REPREPARE_ATTEMPTS`] times.

use std::sync::Arc;
use std::time::Duration;

use cas_protocol::{
    BatchOutcome, ColumnInfo, CursorOrigin, ExecuteFlags, ExecuteOutcome, PrepareFlags,
    ProtocolError, StatementKind, Transport,
};
use cas_types::{FromValue, ToValue, Value};

use crate::client::Driver;
use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::failover::{Reconnect, TimeBudget};
use crate::instrumentation::{extract_operation, sanitize_sql};
use crate::registry::{ConnectionId, StatementId};
use crate::row::Row;
use crate::statement::{DEFAULT_FETCH_SIZE, RequestHandle};

/// Upper bound on re-prepare attempts after the server invalidates a plan.
pub const MAX_REPREPARE_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ExecMode {
    Single(ExecuteFlags),
    Array,
}

#[derive(Debug)]
pub(crate) enum ExecResult {
    Single(ExecuteOutcome),
    Array(Vec<BatchOutcome>),
}

impl ExecResult {
    fn single(self) -> ExecuteOutcome {
        match self {
            Self::Single(outcome) => outcome,
            Self::Array(outcomes) => ExecuteOutcome {
                affected_rows: outcomes
                    .iter()
                    .map(|o| match o {
                        BatchOutcome::Affected(n) => *n,
                        BatchOutcome::Failed { .. } => 0,
                    })
                    .sum(),
                ..ExecuteOutcome::default()
            },
        }
    }

    fn array(self) -> Vec<BatchOutcome> {
        match self {
            Self::Array(outcomes) => outcomes,
            Self::Single(outcome) => vec![BatchOutcome::Affected(outcome.affected_rows)],
        }
    }
}

impl ConnectionHandle {
    /// Look `sql` up in the statement cache, refreshing the hit's query
    /// timeout from the connection default.
    fn cached_statement(&mut self, sql: &str) -> Option<StatementId> {
        let id = self.cache.as_mut()?.lookup(sql)?;
        let timeout = self.query_timeout;
        match self.statements.get_mut(&id) {
            Some(handle) => {
                handle.query_timeout = timeout;
                Some(id)
            }
            None => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.forget(id);
                }
                None
            }
        }
    }

    async fn prepare_statement(
        &mut self,
        transport: &dyn Transport,
        handle: &mut RequestHandle,
        budget: &TimeBudget,
    ) -> Result<()> {
        let in_transaction = self.status.is_in_transaction();
        if self.session.is_none() {
            self.reconnect(transport, budget).await?;
        }

        match self.prepare_once(handle).await {
            Err(err) if err.is_communication() && !in_transaction => {
                if self.reconnect(transport, budget).await? == Reconnect::Reused {
                    return Err(err);
                }
                tracing::debug!(connection = %self.id, "replaying prepare on new session");
                self.prepare_once(handle).await
            }
            other => other,
        }
    }

    async fn prepare_once(&mut self, handle: &mut RequestHandle) -> Result<()> {
        let result = self.session_mut()?.prepare(&handle.sql, handle.flags).await;
        let info = self.observe(result)?;
        handle.apply_prepare(info, self.generation);
        Ok(())
    }

    async fn reprepare(&mut self, id: StatementId) -> Result<()> {
        let (sql, flags) = {
            let handle = self.statement(id)?;
            (handle.sql.clone(), handle.flags)
        };
        let result = self.session_mut()?.prepare(&sql, flags).await;
        let info = self.observe(result)?;
        let generation = self.generation;
        self.statement_mut(id)?.apply_prepare(info, generation);
        tracing::debug!(statement = %id, generation, "statement prepared again");
        Ok(())
    }

    /// Execute with reconnect-and-replay and the re-prepare loop.
    pub(crate) async fn run_statement(
        &mut self,
        transport: &dyn Transport,
        id: StatementId,
        mode: ExecMode,
        budget: &TimeBudget,
    ) -> Result<ExecResult> {
        let in_transaction = self.status.is_in_transaction();
        if self.session.is_none() {
            self.reconnect(transport, budget).await?;
        }

        let mut result = self.execute_once(id, mode, budget).await;

        let lost_session = matches!(&result, Err(err) if err.is_communication());
        if lost_session && !in_transaction {
            if self.reconnect(transport, budget).await? == Reconnect::Established {
                tracing::debug!(statement = %id, "replaying execute on new session");
                result = self.execute_once(id, mode, budget).await;
            }
        }

        let mut attempts = 0;
        while matches!(result, Err(Error::PlanInvalidated)) {
            if attempts >= MAX_REPREPARE_ATTEMPTS {
                tracing::warn!(statement = %id, attempts, "plan keeps being invalidated, giving up");
                break;
            }
            attempts += 1;
            self.statement_mut(id)?.invalidate();
            tracing::debug!(statement = %id, attempt = attempts, "plan invalidated, preparing again");
            result = self.execute_once(id, mode, budget).await;
        }

        match &result {
            Ok(_) => self.note_work_done(),
            Err(Error::QueryTimeout) if self.config.disconnect_on_query_timeout => {
                self.drop_session();
            }
            Err(_) => {}
        }
        result
    }

    /// Make the row at the cursor current, fetching its window when it is
    /// not buffered.
    async fn fetch_current(&mut self, stmt: StatementId) -> Result<()> {
        let generation = self.generation;
        let handle = self.statement(stmt)?;

        if let Some((server_handle, start, count)) = handle.fetch_window()? {
            if !handle.is_prepared_under(generation) {
                return Err(ProtocolError::UnknownStatement(server_handle).into());
            }
            tracing::trace!(statement = %stmt, start, count, "fetching rows");
            let result = self.session_mut()?.fetch(server_handle, start, count).await;
            let rows = self.observe(result)?;
            self.statement_mut(stmt)?.load_rows(start, rows);
        }
        self.statement_mut(stmt)?.mark_fetched()
    }

    async fn execute_once(
        &mut self,
        id: StatementId,
        mode: ExecMode,
        budget: &TimeBudget,
    ) -> Result<ExecResult> {
        if !self.statement(id)?.is_prepared_under(self.generation) {
            self.reprepare(id).await?;
        }
        let timeout = budget.query_remaining()?;

        match mode {
            ExecMode::Single(flags) => {
                let request = self
                    .statement(id)?
                    .execute_request(flags, self.autocommit, timeout)?;
                let result = self.session_mut()?.execute(request).await;
                let outcome = self.observe(result)?;
                self.statement_mut(id)?.apply_execute(&outcome);
                Ok(ExecResult::Single(outcome))
            }
            ExecMode::Array => {
                let (server_handle, rows) = self.statement(id)?.array_rows()?;
                let result = self
                    .session_mut()?
                    .execute_array(server_handle, rows, timeout)
                    .await;
                let outcomes = self.observe(result)?;
                self.statement_mut(id)?.clear_result();
                Ok(ExecResult::Array(outcomes))
            }
        }
    }
}

impl Driver {
    // =========================================================================
    // Prepare and bind
    // =========================================================================

    /// Prepare `sql` on a connection.
    ///
    /// With the statement cache enabled, SQL that is already prepared on
    /// this connection returns the existing statement without a round trip.
    pub async fn prepare(&self, conn: ConnectionId, sql: &str, flags: PrepareFlags) -> Result<StatementId> {
        let (slot, mut guard) = self.lock_connection(conn).await?;
        if let Some(id) = guard.cached_statement(sql) {
            return Ok(id);
        }

        tracing::debug!(
            connection = %conn,
            operation = extract_operation(sql),
            sql = %sanitize_sql(sql),
            "preparing statement"
        );
        let budget = TimeBudget::start(guard.query_timeout);
        let mut handle = RequestHandle::new(sql, flags, guard.query_timeout);
        guard
            .prepare_statement(self.transport(), &mut handle, &budget)
            .await?;
        if slot.is_closed() {
            return Err(Error::ConnectionNotFound(conn));
        }

        let id = self.registry().insert_statement(conn);
        let connection = &mut *guard;
        if let Some(cache) = connection.cache.as_mut() {
            handle.cached = true;
            if let Some(evicted) = cache.insert(sql, id) {
                if let Some(old) = connection.statements.get_mut(&evicted) {
                    old.cached = false;
                }
                tracing::trace!(statement = %evicted, "evicted from statement cache");
            }
        }
        connection.statements.insert(id, handle);
        Ok(id)
    }

    /// Bind a value to the 1-based parameter `index`.
    pub async fn bind_param<T: ToValue + ?Sized>(&self, stmt: StatementId, index: usize, value: &T) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.bind(index, value.to_value())
    }

    /// Set the number of rows for [`execute_array`](Self::execute_array).
    /// Clears previously bound arrays.
    pub async fn bind_param_array_size(&self, stmt: StatementId, size: usize) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.set_array_size(size);
        Ok(())
    }

    /// Bind one value per array row to the 1-based parameter `index`.
    pub async fn bind_param_array(&self, stmt: StatementId, index: usize, values: Vec<Value>) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.bind_array(index, values)
    }

    /// Mark the 1-based parameter `index` as an output parameter of a CALL.
    pub async fn register_out_param(&self, stmt: StatementId, index: usize) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.register_out(index)
    }

    // =========================================================================
    // Execute
    // =========================================================================

    /// Execute a prepared statement; returns the affected row count, or the
    /// result size for queries.
    pub async fn execute(&self, stmt: StatementId, flags: ExecuteFlags) -> Result<i64> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        let handle = guard.statement(stmt)?;
        let budget = TimeBudget::start(handle.query_timeout);
        tracing::debug!(statement = %stmt, sql = %sanitize_sql(&handle.sql), "executing statement");

        let outcome = guard
            .run_statement(self.transport(), stmt, ExecMode::Single(flags.normalized()), &budget)
            .await?
            .single();
        Ok(outcome.affected_rows)
    }

    /// Execute once per bound array row.
    pub async fn execute_array(&self, stmt: StatementId) -> Result<Vec<BatchOutcome>> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        let handle = guard.statement(stmt)?;
        let budget = TimeBudget::start(handle.query_timeout);
        tracing::debug!(statement = %stmt, rows = ?handle.array_size, "executing array");

        Ok(guard
            .run_statement(self.transport(), stmt, ExecMode::Array, &budget)
            .await?
            .array())
    }

    /// Start executing in the background and return immediately.
    ///
    /// The connection stays locked until the execution finishes, so other
    /// operations on it wait. Claim the result with
    /// [`take_execute_result`](Self::take_execute_result); an unclaimed
    /// result is discarded by the next background execute.
    pub async fn spawn_execute(&self, stmt: StatementId, flags: ExecuteFlags) -> Result<()> {
        let (slot, mut guard) = self.lock_statement(stmt).await?;
        let limit = guard.statement(stmt)?.query_timeout;
        let transport = self.transport_arc();

        let mut pending = slot.pending.lock();
        if pending.take().is_some() {
            tracing::debug!(statement = %stmt, "discarding unclaimed background result");
        }
        *pending = Some(tokio::spawn(async move {
            let budget = TimeBudget::start(limit);
            guard
                .run_statement(&*transport, stmt, ExecMode::Single(flags.normalized()), &budget)
                .await
                .map(|result| result.single().affected_rows)
        }));
        tracing::debug!(statement = %stmt, "execution started in background");
        Ok(())
    }

    /// Claim the result of [`spawn_execute`](Self::spawn_execute).
    ///
    /// Fails with [`Error::StillRunning`] while the execution is in
    /// progress, leaving the result claimable later.
    pub async fn take_execute_result(&self, conn: ConnectionId) -> Result<i64> {
        let slot = self.registry().connection(conn)?;
        let task = {
            let mut pending = slot.pending.lock();
            let finished = pending.as_ref().map(tokio::task::JoinHandle::is_finished);
            match finished {
                None => return Err(Error::NoPendingExecution),
                Some(false) => return Err(Error::StillRunning),
                Some(true) => pending.take(),
            }
        };
        let Some(task) = task else {
            return Err(Error::NoPendingExecution);
        };
        match task.await {
            Ok(result) => result,
            Err(err) => Err(Error::Background(err.to_string())),
        }
    }

    /// Move to the next result of a multi-statement execution.
    pub async fn next_result(&self, stmt: StatementId) -> Result<i64> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        let generation = guard.generation;
        let handle = guard.statement(stmt)?;
        if !handle.more_results {
            return Err(Error::NoMoreData);
        }
        let server_handle = handle
            .live_server_handle(generation)
            .ok_or(Error::NoMoreData)?;

        let result = guard.session_mut()?.next_result(server_handle).await;
        let outcome = guard.observe(result)?;
        guard.statement_mut(stmt)?.apply_execute(&outcome);
        Ok(outcome.affected_rows)
    }

    // =========================================================================
    // Cursor and fetch
    // =========================================================================

    /// Move the cursor. Fails with [`Error::NoMoreData`] when the target row
    /// lies outside the result; the position is then unchanged.
    pub async fn cursor(&self, stmt: StatementId, offset: i64, origin: CursorOrigin) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.move_cursor(offset, origin)
    }

    /// Make the row at the cursor current, fetching it from the server when
    /// it is not buffered.
    pub async fn fetch(&self, stmt: StatementId) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.fetch_current(stmt).await
    }

    /// Fetch and return the row at the cursor.
    pub async fn fetch_row(&self, stmt: StatementId) -> Result<Row> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.fetch_current(stmt).await?;
        let handle = guard.statement(stmt)?;
        let columns: Arc<[ColumnInfo]> = handle.columns.clone().into();
        Ok(Row::new(columns, handle.current_row()?.to_vec()))
    }

    /// Read the 1-based `column` of the current row.
    pub async fn get_data<T: FromValue>(&self, stmt: StatementId, column: usize) -> Result<T> {
        let (_, guard) = self.lock_statement(stmt).await?;
        let value = guard.statement(stmt)?.column_value(column)?;
        Ok(T::from_value(value)?)
    }

    /// Read the 1-based output parameter `index` after a CALL.
    pub async fn out_param<T: FromValue>(&self, stmt: StatementId, index: usize) -> Result<T> {
        let (_, guard) = self.lock_statement(stmt).await?;
        let value = guard.statement(stmt)?.out_value(index)?;
        Ok(T::from_value(value)?)
    }

    // =========================================================================
    // Statement settings and metadata
    // =========================================================================

    /// Rows requested per fetch round trip.
    pub async fn fetch_size(&self, stmt: StatementId) -> Result<usize> {
        let (_, guard) = self.lock_statement(stmt).await?;
        Ok(guard.statement(stmt)?.fetch_size)
    }

    /// Change the rows requested per fetch round trip; 0 restores the
    /// default.
    pub async fn set_fetch_size(&self, stmt: StatementId, size: usize) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.fetch_size = if size == 0 { DEFAULT_FETCH_SIZE } else { size };
        Ok(())
    }

    /// Limit the rows of later results; `None` removes the limit.
    pub async fn set_max_rows(&self, stmt: StatementId, max_rows: Option<usize>) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        guard.statement_mut(stmt)?.max_rows = max_rows;
        Ok(())
    }

    /// Query timeout of the statement.
    pub async fn query_timeout(&self, stmt: StatementId) -> Result<Option<Duration>> {
        let (_, guard) = self.lock_statement(stmt).await?;
        Ok(guard.statement(stmt)?.query_timeout)
    }

    /// Change the query timeout of the statement; returns the previous one.
    pub async fn set_query_timeout(&self, stmt: StatementId, timeout: Option<Duration>) -> Result<Option<Duration>> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        let handle = guard.statement_mut(stmt)?;
        Ok(std::mem::replace(&mut handle.query_timeout, timeout))
    }

    /// Column metadata of the statement's result.
    pub async fn result_info(&self, stmt: StatementId) -> Result<Vec<ColumnInfo>> {
        let (_, guard) = self.lock_statement(stmt).await?;
        Ok(guard.statement(stmt)?.columns.clone())
    }

    /// Kind of the prepared statement.
    pub async fn statement_kind(&self, stmt: StatementId) -> Result<StatementKind> {
        let (_, guard) = self.lock_statement(stmt).await?;
        Ok(guard.statement(stmt)?.kind)
    }

    /// Rows in the current result.
    pub async fn row_count(&self, stmt: StatementId) -> Result<usize> {
        let (_, guard) = self.lock_statement(stmt).await?;
        Ok(guard.statement(stmt)?.row_count())
    }

    /// Free a statement.
    ///
    /// Statements reachable through the statement cache stay alive; closing
    /// them does nothing.
    pub async fn close_statement(&self, stmt: StatementId) -> Result<()> {
        let (_, mut guard) = self.lock_statement(stmt).await?;
        if guard.statement(stmt)?.cached {
            tracing::trace!(statement = %stmt, "close of cached statement ignored");
            return Ok(());
        }
        guard.free_statement(self.registry(), stmt).await;
        tracing::debug!(statement = %stmt, "statement closed");
        Ok(())
    }
}
