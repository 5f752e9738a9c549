//! Connection handles.
//!
//! A [`ConnectionSlot`] is what the registry stores. It wraps the
//! [`ConnectionHandle`] in an async mutex: holding the guard is holding the
//! connection, so at most one operation runs per connection and waiters are
//! woken in order when the guard drops.
//!
//! Parts of a slot that must be reachable while an operation is in flight
//! (cancel target, background result) live outside that mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cas_protocol::{CancelTarget, IsolationLevel, ProtocolError, Session, TransactionEnd};
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::{ConnectionId, Registry, StatementId};
use crate::state::ConnectionStatus;
use crate::statement::RequestHandle;
use crate::statement_cache::StatementCache;

/// Something that hands out connections and takes them back on disconnect.
///
/// A datasource registers itself as owner of the connections it creates;
/// [`Driver::disconnect`](crate::Driver::disconnect) then returns such a
/// connection to its owner instead of closing it.
#[async_trait]
pub trait ConnectionOwner: Send + Sync {
    /// Take back a connection. Returns `false` if the connection was not
    /// currently handed out by this owner.
    async fn reclaim(&self, id: ConnectionId) -> bool;
}

/// Result of a background execution, claimed later by the caller.
pub(crate) type PendingExecute = JoinHandle<Result<i64>>;

/// Registry entry for one connection.
pub(crate) struct ConnectionSlot {
    pub(crate) handle: Arc<Mutex<ConnectionHandle>>,
    pub(crate) cancel_target: Arc<parking_lot::Mutex<Option<CancelTarget>>>,
    pub(crate) pending: parking_lot::Mutex<Option<PendingExecute>>,
    owner: OnceCell<Weak<dyn ConnectionOwner>>,
    closed: Arc<AtomicBool>,
}

impl ConnectionSlot {
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        let cancel_target = Arc::clone(&handle.cancel_target);
        let closed = Arc::clone(&handle.closed);
        Self {
            handle: Arc::new(Mutex::new(handle)),
            cancel_target,
            pending: parking_lot::Mutex::new(None),
            owner: OnceCell::new(),
            closed,
        }
    }

    /// Acquire exclusive use of the connection.
    pub(crate) async fn lock(&self, id: ConnectionId) -> Result<OwnedMutexGuard<ConnectionHandle>> {
        let guard = Arc::clone(&self.handle).lock_owned().await;
        if self.is_closed() {
            return Err(Error::ConnectionNotFound(id));
        }
        tracing::trace!(connection = %id, "connection lock acquired");
        Ok(guard)
    }

    /// Whether an operation currently holds the connection.
    pub(crate) fn is_busy(&self) -> bool {
        self.handle.try_lock().is_err()
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn ConnectionOwner>) -> bool {
        self.owner.set(owner).is_ok()
    }

    pub(crate) fn owner(&self) -> Option<Arc<dyn ConnectionOwner>> {
        self.owner.get().and_then(Weak::upgrade)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Protocol state of one logical connection.
pub(crate) struct ConnectionHandle {
    pub(crate) id: ConnectionId,
    pub(crate) config: Config,
    pub(crate) session: Option<Box<dyn Session>>,
    pub(crate) status: ConnectionStatus,
    /// Index into `config.alternate_hosts`; `None` while on the primary.
    pub(crate) host_index: Option<usize>,
    /// When the connection moved to an alternate host.
    pub(crate) failed_over_at: Option<Instant>,
    /// Bumped on every new session; request handles prepared under an older
    /// generation must be prepared again.
    pub(crate) generation: u64,
    pub(crate) autocommit: bool,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) login_timeout: Option<Duration>,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) statements: HashMap<StatementId, RequestHandle>,
    pub(crate) cache: Option<StatementCache>,
    pub(crate) cancel_target: Arc<parking_lot::Mutex<Option<CancelTarget>>>,
    /// Shared with the slot; set once the id has been freed.
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, config: Config) -> Self {
        let cache = config
            .statement_pool
            .then(|| StatementCache::new(config.statement_cache_size))
            .flatten();
        Self {
            id,
            login_timeout: config.login_timeout,
            query_timeout: config.query_timeout,
            autocommit: config.autocommit.unwrap_or(true),
            config,
            session: None,
            status: ConnectionStatus::Disconnected,
            host_index: None,
            failed_over_at: None,
            generation: 0,
            isolation: None,
            statements: HashMap::new(),
            cache,
            cancel_target: Arc::new(parking_lot::Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the id was freed while this handle was in use.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take over the settings of a new connect request. Used when a parked
    /// handle is handed to a new caller.
    pub(crate) fn reconfigure(&mut self, config: Config) {
        if config.statement_pool != self.config.statement_pool
            || config.statement_cache_size != self.config.statement_cache_size
        {
            self.cache = config
                .statement_pool
                .then(|| StatementCache::new(config.statement_cache_size))
                .flatten();
        }
        self.login_timeout = config.login_timeout;
        self.query_timeout = config.query_timeout;
        self.autocommit = config.autocommit.unwrap_or(true);
        self.isolation = None;
        self.config = config;
    }

    /// Adopt the server's autocommit default unless the config fixed one.
    pub(crate) fn adopt_session_autocommit(&mut self) {
        if self.config.autocommit.is_some() {
            return;
        }
        if let Some(session) = self.session.as_ref() {
            self.autocommit = session.info().autocommit;
        }
    }

    pub(crate) fn session_mut(&mut self) -> Result<&mut Box<dyn Session>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Communication("connection is not established".into()))
    }

    pub(crate) fn statement(&self, id: StatementId) -> Result<&RequestHandle> {
        self.statements
            .get(&id)
            .ok_or(Error::StatementNotFound(id))
    }

    pub(crate) fn statement_mut(&mut self, id: StatementId) -> Result<&mut RequestHandle> {
        self.statements
            .get_mut(&id)
            .ok_or(Error::StatementNotFound(id))
    }

    /// Translate a protocol result, applying the session teardown rules.
    ///
    /// A communication failure always drops the session. A query timeout
    /// drops it when `disconnect_on_query_timeout` is set.
    pub(crate) fn observe<T>(&mut self, result: std::result::Result<T, ProtocolError>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_communication() {
                    tracing::debug!(connection = %self.id, error = %err, "session lost");
                    self.drop_session();
                } else if matches!(err, ProtocolError::QueryTimeout)
                    && self.config.disconnect_on_query_timeout
                {
                    tracing::debug!(
                        connection = %self.id,
                        "query timeout, dropping session"
                    );
                    self.drop_session();
                }
                Err(err.into())
            }
        }
    }

    /// Mark the start of uncommitted work after a successful request.
    pub(crate) fn note_work_done(&mut self) {
        if !self.autocommit && self.session.is_some() {
            self.status = ConnectionStatus::InTransaction;
        }
    }

    /// Commit or roll back; no server call when nothing is pending.
    pub(crate) async fn end_transaction(&mut self, end: TransactionEnd) -> Result<()> {
        if self.status.is_in_transaction() {
            let result = self.session_mut()?.end_transaction(end).await;
            self.observe(result)?;
            self.status = ConnectionStatus::OutOfTransaction;
            tracing::debug!(connection = %self.id, ?end, "transaction ended");
        }
        Ok(())
    }

    /// Prepare the handle for its next user: roll back, reset the server
    /// session, and free statements. Cached statements survive when
    /// `keep_cached` is set.
    ///
    /// Failures here are secondary to the caller's result and are only
    /// logged.
    pub(crate) async fn reset_for_reuse(&mut self, registry: &Registry, keep_cached: bool) {
        if let Err(err) = self.end_transaction(TransactionEnd::Rollback).await {
            tracing::debug!(connection = %self.id, error = %err, "rollback on release failed");
        }
        if let Some(session) = self.session.as_mut() {
            let result = session.end_session().await;
            if let Err(err) = self.observe(result) {
                tracing::debug!(connection = %self.id, error = %err, "end session failed");
            }
        }

        let doomed: Vec<StatementId> = self
            .statements
            .iter()
            .filter(|(_, handle)| !(keep_cached && handle.cached))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.free_statement(registry, id).await;
        }
        if !keep_cached {
            if let Some(cache) = self.cache.as_mut() {
                cache.clear();
            }
        }
    }

    /// Remove a statement from this handle and the registry, releasing its
    /// server handle when it is still valid.
    pub(crate) async fn free_statement(&mut self, registry: &Registry, id: StatementId) {
        registry.remove_statement(id);
        let Some(handle) = self.statements.remove(&id) else {
            return;
        };
        if let Some(cache) = self.cache.as_mut() {
            cache.forget(id);
        }
        let Some(server_handle) = handle.live_server_handle(self.generation) else {
            return;
        };
        if let Some(session) = self.session.as_mut() {
            let result = session.close_statement(server_handle).await;
            if let Err(err) = self.observe(result) {
                tracing::debug!(statement = %id, error = %err, "closing server statement failed");
            }
        }
    }
}

impl Drop for ConnectionHandle {
    /// A handle freed while an operation held it still owns that
    /// operation's session. Close it on the runtime, if one is running.
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.id;
        runtime.spawn(async move {
            if let Err(err) = session.close().await {
                tracing::debug!(connection = %id, error = %err, "closing orphaned session failed");
            }
        });
        tracing::debug!(connection = %id, "closing orphaned session");
    }
}
