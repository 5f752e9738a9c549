//! Request (statement) handles.
//!
//! A request handle owns everything the driver knows about one prepared
//! statement: the SQL text, bound parameters, result metadata and the
//! client-side cursor. All indices exposed to callers are 1-based.

use std::time::Duration;

use cas_protocol::{
    ColumnInfo, CursorOrigin, ExecuteFlags, ExecuteOutcome, ExecuteRequest, PrepareFlags,
    PrepareInfo, StatementKind,
};
use cas_types::Value;

use crate::error::{Error, Result};

/// Rows requested per fetch round trip unless changed.
pub const DEFAULT_FETCH_SIZE: usize = 100;

#[derive(Debug, Default)]
pub(crate) struct Cursor {
    /// Rows in the current result, after `max_rows`.
    total: usize,
    /// 1-based position; 0 is before the first row.
    position: usize,
    /// 1-based row number of `window[0]`.
    window_start: usize,
    window: Vec<Vec<Value>>,
    /// Position the last successful fetch made current.
    fetched: Option<usize>,
}

impl Cursor {
    fn reset(&mut self, total: usize) {
        *self = Self {
            total,
            ..Self::default()
        };
    }

    fn row(&self, position: usize) -> Option<&Vec<Value>> {
        position
            .checked_sub(self.window_start)
            .and_then(|offset| self.window.get(offset))
    }
}

#[derive(Debug)]
pub(crate) struct RequestHandle {
    pub(crate) sql: String,
    pub(crate) flags: PrepareFlags,
    pub(crate) kind: StatementKind,
    pub(crate) server_handle: Option<u32>,
    /// Connection generation the server handle belongs to; `0` = never.
    pub(crate) prepared_generation: u64,
    pub(crate) columns: Vec<ColumnInfo>,
    pub(crate) binds: Vec<Option<Value>>,
    pub(crate) out_params: Vec<bool>,
    pub(crate) array_size: Option<usize>,
    pub(crate) array_binds: Vec<Option<Vec<Value>>>,
    pub(crate) out_values: Vec<Value>,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) fetch_size: usize,
    pub(crate) max_rows: Option<usize>,
    pub(crate) more_results: bool,
    /// Visible through the statement cache.
    pub(crate) cached: bool,
    pub(crate) cursor: Cursor,
}

impl RequestHandle {
    pub(crate) fn new(sql: &str, flags: PrepareFlags, query_timeout: Option<Duration>) -> Self {
        Self {
            sql: sql.to_string(),
            flags,
            kind: StatementKind::Other,
            server_handle: None,
            prepared_generation: 0,
            columns: Vec::new(),
            binds: Vec::new(),
            out_params: Vec::new(),
            array_size: None,
            array_binds: Vec::new(),
            out_values: Vec::new(),
            query_timeout,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_rows: None,
            more_results: false,
            cached: false,
            cursor: Cursor::default(),
        }
    }

    /// Build a handle for an already-open server result (schema info).
    pub(crate) fn from_result(
        label: String,
        info: PrepareInfo,
        rows: usize,
        generation: u64,
    ) -> Self {
        let mut handle = Self::new(&label, PrepareFlags::empty(), None);
        handle.apply_prepare(info, generation);
        handle.cursor.reset(rows);
        handle
    }

    /// Record a prepare reply. Bound values survive a re-prepare.
    pub(crate) fn apply_prepare(&mut self, info: PrepareInfo, generation: u64) {
        self.server_handle = Some(info.server_handle);
        self.kind = info.kind;
        self.columns = info.columns;
        self.binds.resize(info.bind_count, None);
        self.out_params.resize(info.bind_count, false);
        self.array_binds.resize(info.bind_count, None);
        self.prepared_generation = generation;
        self.cursor.reset(0);
    }

    pub(crate) fn is_prepared_under(&self, generation: u64) -> bool {
        self.server_handle.is_some() && self.prepared_generation == generation
    }

    /// Server handle, if it belongs to the current session.
    pub(crate) fn live_server_handle(&self, generation: u64) -> Option<u32> {
        self.server_handle
            .filter(|_| self.prepared_generation == generation)
    }

    /// Forget the server handle so the next execute prepares again.
    pub(crate) fn invalidate(&mut self) {
        self.prepared_generation = 0;
    }

    fn param_slot(&self, index: usize) -> Result<usize> {
        let count = self.binds.len();
        if index == 0 || index > count {
            return Err(Error::BindIndex { index, count });
        }
        Ok(index - 1)
    }

    pub(crate) fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        let slot = self.param_slot(index)?;
        self.binds[slot] = Some(value);
        Ok(())
    }

    pub(crate) fn register_out(&mut self, index: usize) -> Result<()> {
        let slot = self.param_slot(index)?;
        self.out_params[slot] = true;
        Ok(())
    }

    pub(crate) fn set_array_size(&mut self, size: usize) {
        self.array_size = Some(size);
        self.array_binds.iter_mut().for_each(|b| *b = None);
    }

    pub(crate) fn bind_array(&mut self, index: usize, values: Vec<Value>) -> Result<()> {
        let slot = self.param_slot(index)?;
        let size = self
            .array_size
            .ok_or_else(|| Error::BindArraySize("array size not set".into()))?;
        if values.len() != size {
            return Err(Error::BindArraySize(format!(
                "parameter {index} has {} values, array size is {size}",
                values.len()
            )));
        }
        self.array_binds[slot] = Some(values);
        Ok(())
    }

    fn server_handle(&self) -> Result<u32> {
        self.server_handle
            .ok_or_else(|| Error::Communication("statement is not prepared".into()))
    }

    pub(crate) fn execute_request(
        &self,
        flags: ExecuteFlags,
        autocommit: bool,
        timeout: Option<Duration>,
    ) -> Result<ExecuteRequest> {
        let params = self
            .binds
            .iter()
            .zip(&self.out_params)
            .enumerate()
            .map(|(i, (bound, out))| match (bound, out) {
                (Some(value), _) => Ok(value.clone()),
                (None, true) => Ok(Value::Null),
                (None, false) => Err(Error::UnboundParameter { index: i + 1 }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ExecuteRequest {
            server_handle: self.server_handle()?,
            flags,
            params,
            max_rows: self.max_rows,
            autocommit,
            timeout,
        })
    }

    /// Parameter rows for an array execution: one row per array element.
    pub(crate) fn array_rows(&self) -> Result<(u32, Vec<Vec<Value>>)> {
        let size = self
            .array_size
            .ok_or_else(|| Error::BindArraySize("array size not set".into()))?;
        let columns = self
            .array_binds
            .iter()
            .enumerate()
            .map(|(i, values)| {
                values.as_ref().ok_or(Error::UnboundParameter { index: i + 1 })
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = (0..size)
            .map(|row| columns.iter().map(|values| values[row].clone()).collect())
            .collect();
        Ok((self.server_handle()?, rows))
    }

    pub(crate) fn apply_execute(&mut self, outcome: &ExecuteOutcome) {
        let mut total = outcome.row_count.unwrap_or(0);
        if let Some(max) = self.max_rows {
            total = total.min(max);
        }
        self.cursor.reset(total);
        self.out_values.clone_from(&outcome.out_params);
        self.more_results = outcome.more_results;
    }

    pub(crate) fn clear_result(&mut self) {
        self.cursor.reset(0);
        self.more_results = false;
    }

    /// Move the cursor. The position is left unchanged when the target lies
    /// outside the result.
    pub(crate) fn move_cursor(&mut self, offset: i64, origin: CursorOrigin) -> Result<()> {
        let total = i64::try_from(self.cursor.total).unwrap_or(i64::MAX);
        let current = i64::try_from(self.cursor.position).unwrap_or(i64::MAX);
        let target = match origin {
            CursorOrigin::First => offset,
            CursorOrigin::Current => current.saturating_add(offset),
            CursorOrigin::Last => total.saturating_sub(offset).saturating_add(1),
        };
        if target < 1 || target > total {
            return Err(Error::NoMoreData);
        }
        self.cursor.position = usize::try_from(target).map_err(|_| Error::NoMoreData)?;
        self.cursor.fetched = None;
        Ok(())
    }

    /// Rows to request from the server so the current position is
    /// buffered, or `None` when it already is.
    pub(crate) fn fetch_window(&self) -> Result<Option<(u32, usize, usize)>> {
        let position = self.cursor.position;
        if position == 0 || position > self.cursor.total {
            return Err(Error::InvalidCursorPosition);
        }
        if self.cursor.row(position).is_some() {
            return Ok(None);
        }
        let remaining = self.cursor.total - position + 1;
        Ok(Some((
            self.server_handle()?,
            position,
            self.fetch_size.min(remaining),
        )))
    }

    pub(crate) fn load_rows(&mut self, start: usize, rows: Vec<Vec<Value>>) {
        self.cursor.window_start = start;
        self.cursor.window = rows;
    }

    /// Make the buffered row at the cursor current.
    pub(crate) fn mark_fetched(&mut self) -> Result<()> {
        let position = self.cursor.position;
        if self.cursor.row(position).is_none() {
            return Err(Error::NoMoreData);
        }
        self.cursor.fetched = Some(position);
        Ok(())
    }

    pub(crate) fn current_row(&self) -> Result<&[Value]> {
        self.cursor
            .fetched
            .and_then(|position| self.cursor.row(position))
            .map(Vec::as_slice)
            .ok_or(Error::InvalidCursorPosition)
    }

    pub(crate) fn column_value(&self, column: usize) -> Result<&Value> {
        let row = self.current_row()?;
        let count = row.len();
        column
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .ok_or(Error::ColumnIndex {
                index: column,
                count,
            })
    }

    pub(crate) fn out_value(&self, index: usize) -> Result<&Value> {
        let slot = self.param_slot(index)?;
        self.out_values.get(slot).ok_or(Error::NoMoreData)
    }

    pub(crate) fn row_count(&self) -> usize {
        self.cursor.total
    }
}
