//! The driver entry point and connection-level operations.
//!
//! [`Driver`] is a cheap, cloneable handle over shared state: the transport
//! used to reach brokers, the handle registry, and the list of parked
//! broker-pooled connections. Every operation looks its handle up in the
//! registry, takes the connection lock, and releases it when the returned
//! future completes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cas_client::{Config, Driver, TransactionEnd};
//!
//! let driver = Driver::new(transport);
//! let conn = driver
//!     .connect_url("cci:cubrid:localhost:33000:demodb:::?autocommit=false", "dba", "")
//!     .await?;
//!
//! let stmt = driver.prepare(conn, "insert into t values (?)", PrepareFlags::empty()).await?;
//! driver.bind_param(stmt, 1, &42i32).await?;
//! driver.execute(stmt, ExecuteFlags::empty()).await?;
//! driver.end_tran(conn, TransactionEnd::Commit).await?;
//! driver.disconnect(conn).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cas_protocol::{
    BatchOutcome, DbParameter, HostAddr, IsolationLevel, SavepointCommand, SchemaType,
    SessionInfo, TransactionEnd, Transport,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::OwnedMutexGuard;

use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionOwner, ConnectionSlot};
use crate::error::{Error, Result};
use crate::failover::TimeBudget;
use crate::registry::{ConnectionId, Registry, StatementId};
use crate::state::ConnectionStatus;
use crate::statement::RequestHandle;

/// Parked broker-pooled connections are reused only for an identical target
/// and identity.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ParkKey {
    addr: HostAddr,
    database: String,
    user: String,
    password: String,
}

impl ParkKey {
    fn of(config: &Config) -> Self {
        Self {
            addr: config.primary(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    registry: Registry,
    parked: parking_lot::Mutex<HashMap<ParkKey, Vec<ConnectionId>>>,
}

/// Client driver for CAS brokers.
///
/// Connections and statements are addressed by [`ConnectionId`] and
/// [`StatementId`]. Ids stay valid until the handle is freed; after that
/// they fail with [`Error::ConnectionNotFound`] or
/// [`Error::StatementNotFound`], even if the underlying slot is reused.
#[derive(Clone)]
pub struct Driver {
    shared: Arc<Shared>,
}

impl Driver {
    /// Create a driver that reaches brokers through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                registry: Registry::default(),
                parked: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        &*self.shared.transport
    }

    pub(crate) fn transport_arc(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.shared.transport)
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub(crate) async fn lock_connection(
        &self,
        id: ConnectionId,
    ) -> Result<(Arc<ConnectionSlot>, OwnedMutexGuard<ConnectionHandle>)> {
        let slot = self.shared.registry.connection(id)?;
        let guard = slot.lock(id).await?;
        Ok((slot, guard))
    }

    /// Lock the connection owning `id`, checking the statement still exists
    /// once the lock is held.
    pub(crate) async fn lock_statement(
        &self,
        id: StatementId,
    ) -> Result<(Arc<ConnectionSlot>, OwnedMutexGuard<ConnectionHandle>)> {
        let (owner, slot) = self.shared.registry.statement_owner(id)?;
        let guard = slot.lock(owner).await?;
        guard.statement(id)?;
        Ok((slot, guard))
    }

    // =========================================================================
    // Connect / disconnect
    // =========================================================================

    /// Open a connection.
    ///
    /// A parked broker-pooled connection with the same target and
    /// credentials is reused when one is available. Otherwise the primary
    /// host is tried first, then each alternate, all within the login
    /// timeout. On failure no handle is left behind.
    pub async fn connect(&self, config: Config) -> Result<ConnectionId> {
        config.validate()?;

        if let Some(id) = self.revive_parked(&config).await {
            return Ok(id);
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            alternates = config.alternate_hosts.len(),
            "connecting to broker"
        );

        let id = self
            .shared
            .registry
            .insert_connection(|id| ConnectionSlot::new(ConnectionHandle::new(id, config)));
        let (slot, mut guard) = self.lock_connection(id).await?;

        let budget = TimeBudget::start(guard.login_timeout);
        if let Err(err) = guard.reconnect(self.transport(), &budget).await {
            slot.mark_closed();
            self.shared.registry.remove_connection(id);
            tracing::warn!(connection = %id, error = %err, "connect failed");
            return Err(err);
        }
        guard.adopt_session_autocommit();
        Ok(id)
    }

    /// Open a connection described by a `cci:cubrid:` URL.
    ///
    /// `user` and `password` apply only when the URL does not carry them.
    pub async fn connect_url(&self, url: &str, user: &str, password: &str) -> Result<ConnectionId> {
        self.connect(Config::from_url(url, user, password)?).await
    }

    async fn revive_parked(&self, config: &Config) -> Option<ConnectionId> {
        let key = ParkKey::of(config);
        loop {
            let id = self.shared.parked.lock().get_mut(&key).and_then(Vec::pop)?;
            let Ok((_, mut guard)) = self.lock_connection(id).await else {
                continue;
            };

            guard.reconfigure(config.clone());
            let budget = TimeBudget::start(guard.login_timeout);
            match guard.reconnect(self.transport(), &budget).await {
                Ok(_) => {
                    guard.adopt_session_autocommit();
                    tracing::info!(connection = %id, "reusing parked connection");
                    return Some(id);
                }
                Err(err) => {
                    tracing::debug!(connection = %id, error = %err, "parked connection unusable");
                    drop(guard);
                    if let Err(err) = self.force_disconnect(id, false).await {
                        tracing::debug!(connection = %id, error = %err, "discarding parked connection failed");
                    }
                }
            }
        }
    }

    fn unpark(&self, id: ConnectionId) {
        let mut parked = self.shared.parked.lock();
        parked.retain(|_, ids| {
            ids.retain(|parked_id| *parked_id != id);
            !ids.is_empty()
        });
    }

    /// Close a connection.
    ///
    /// A connection owned by a datasource is rolled back, its server session
    /// ended, and handed back to the datasource. A broker-pooled connection
    /// is rolled back and parked for the next [`connect`](Self::connect)
    /// with the same target and credentials. Anything else is closed and
    /// its id freed.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let (slot, mut guard) = self.lock_connection(id).await?;

        if let Some(owner) = slot.owner() {
            guard.reset_for_reuse(self.registry(), true).await;
            drop(guard);
            if owner.reclaim(id).await {
                tracing::info!(connection = %id, "connection returned to datasource");
            } else {
                tracing::debug!(connection = %id, "datasource did not lend this connection");
            }
            return Ok(());
        }

        let pconnect = guard
            .session
            .as_ref()
            .is_some_and(|session| session.info().pconnect);
        if pconnect {
            guard.reset_for_reuse(self.registry(), false).await;
            if guard.session.is_some() {
                let key = ParkKey::of(&guard.config);
                drop(guard);
                self.shared.parked.lock().entry(key).or_default().push(id);
                tracing::info!(connection = %id, "connection parked for reuse");
                return Ok(());
            }
        }

        slot.mark_closed();
        self.shared.registry.remove_connection(id);
        guard.statements.clear();
        guard.close_session().await;
        tracing::info!(connection = %id, "disconnected");
        Ok(())
    }

    /// Close a connection without waiting for a running operation.
    ///
    /// The id is freed immediately. If the connection is idle its session is
    /// closed now (gracefully when `graceful` is set); otherwise the session
    /// goes away when the running operation releases the connection.
    pub async fn force_disconnect(&self, id: ConnectionId, graceful: bool) -> Result<()> {
        let slot = self
            .shared
            .registry
            .remove_connection(id)
            .ok_or(Error::ConnectionNotFound(id))?;
        slot.mark_closed();
        self.unpark(id);

        match Arc::clone(&slot.handle).try_lock_owned() {
            Ok(mut guard) => {
                if graceful {
                    guard.close_session().await;
                } else {
                    guard.drop_session();
                }
                guard.statements.clear();
            }
            Err(_) => {
                tracing::debug!(connection = %id, "connection busy, closing when released");
            }
        }
        tracing::info!(connection = %id, graceful, "connection force-closed");
        Ok(())
    }

    /// Register the owner that [`disconnect`](Self::disconnect) returns
    /// this connection to. A connection can have one owner.
    pub fn set_owner(&self, id: ConnectionId, owner: Weak<dyn ConnectionOwner>) -> Result<()> {
        let slot = self.shared.registry.connection(id)?;
        if slot.set_owner(owner) {
            Ok(())
        } else {
            Err(Error::Config(format!("{id} already has an owner")))
        }
    }

    // =========================================================================
    // Transactions and session settings
    // =========================================================================

    /// Commit or roll back. Nothing is sent when no work is pending.
    ///
    /// A connection that failed over and has been on the alternate host for
    /// longer than `rc_time` closes its session afterwards, so the next
    /// operation reconnects to the primary.
    pub async fn end_tran(&self, id: ConnectionId, end: TransactionEnd) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        guard.end_transaction(end).await?;
        guard.fail_back_if_due().await;
        Ok(())
    }

    /// Current autocommit mode.
    pub async fn autocommit(&self, id: ConnectionId) -> Result<bool> {
        let (_, guard) = self.lock_connection(id).await?;
        Ok(guard.autocommit)
    }

    /// Switch autocommit; turning it on commits pending work first.
    pub async fn set_autocommit(&self, id: ConnectionId, enabled: bool) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        if guard.autocommit == enabled {
            return Ok(());
        }
        if enabled {
            guard.end_transaction(TransactionEnd::Commit).await?;
        }
        guard.autocommit = enabled;
        tracing::debug!(connection = %id, autocommit = enabled, "autocommit changed");
        Ok(())
    }

    /// Isolation level in effect on the server.
    pub async fn isolation_level(&self, id: ConnectionId) -> Result<IsolationLevel> {
        let code = self.get_db_parameter(id, DbParameter::IsolationLevel).await?;
        IsolationLevel::from_code(code).ok_or(Error::InvalidIsolationLevel(code))
    }

    /// Set the isolation level. The level is remembered and applied again
    /// to every new session of this connection.
    pub async fn set_isolation_level(&self, id: ConnectionId, level: IsolationLevel) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        guard.isolation = Some(level);
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard
            .session_mut()?
            .set_db_parameter(DbParameter::IsolationLevel, level.code())
            .await;
        guard.observe(result)
    }

    /// Read a session parameter.
    pub async fn get_db_parameter(&self, id: ConnectionId, param: DbParameter) -> Result<i32> {
        let (_, mut guard) = self.lock_connection(id).await?;
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard.session_mut()?.get_db_parameter(param).await;
        guard.observe(result)
    }

    /// Change a session parameter.
    pub async fn set_db_parameter(&self, id: ConnectionId, param: DbParameter, value: i32) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard.session_mut()?.set_db_parameter(param, value).await;
        guard.observe(result)?;
        tracing::debug!(connection = %id, ?param, value, "db parameter changed");
        Ok(())
    }

    /// Create or roll back to a savepoint.
    ///
    /// Does nothing when the connection has no live session, since there is
    /// no transaction a savepoint could belong to.
    pub async fn savepoint(&self, id: ConnectionId, cmd: SavepointCommand, name: &str) -> Result<()> {
        validate_identifier(name)?;
        let (_, mut guard) = self.lock_connection(id).await?;
        if guard.session.is_none() {
            return Ok(());
        }
        let result = guard.session_mut()?.savepoint(cmd, name).await;
        guard.observe(result)?;
        tracing::debug!(connection = %id, ?cmd, savepoint = name, "savepoint");
        Ok(())
    }

    /// Default login timeout of the connection.
    pub async fn login_timeout(&self, id: ConnectionId) -> Result<Option<Duration>> {
        let (_, guard) = self.lock_connection(id).await?;
        Ok(guard.login_timeout)
    }

    /// Change the login timeout used by later reconnects.
    pub async fn set_login_timeout(&self, id: ConnectionId, timeout: Option<Duration>) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        guard.login_timeout = timeout;
        Ok(())
    }

    /// Change the query timeout given to statements prepared from now on.
    pub async fn set_default_query_timeout(
        &self,
        id: ConnectionId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let (_, mut guard) = self.lock_connection(id).await?;
        guard.query_timeout = timeout;
        Ok(())
    }

    // =========================================================================
    // Connection-level requests
    // =========================================================================

    /// Execute several SQL texts in one round trip.
    ///
    /// Per-statement failures are reported in the outcomes, not as an error.
    pub async fn execute_batch(&self, id: ConnectionId, sql: &[&str]) -> Result<Vec<BatchOutcome>> {
        let sql: Vec<String> = sql.iter().map(|s| (*s).to_string()).collect();
        let (_, mut guard) = self.lock_connection(id).await?;
        let budget = TimeBudget::start(guard.query_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let timeout = budget.query_remaining()?;

        tracing::debug!(connection = %id, statements = sql.len(), "executing batch");
        let result = guard.session_mut()?.execute_batch(&sql, timeout).await;
        let outcomes = guard.observe(result)?;
        guard.note_work_done();
        Ok(outcomes)
    }

    /// Server version string.
    pub async fn db_version(&self, id: ConnectionId) -> Result<String> {
        let (_, mut guard) = self.lock_connection(id).await?;
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard.session_mut()?.db_version().await;
        guard.observe(result)
    }

    /// Open a schema information result as a new statement.
    ///
    /// The statement is fetched like a query result and freed with
    /// [`close_statement`](Self::close_statement).
    pub async fn schema_info(
        &self,
        id: ConnectionId,
        kind: SchemaType,
        name: Option<&str>,
    ) -> Result<StatementId> {
        let (_, mut guard) = self.lock_connection(id).await?;
        let budget = TimeBudget::start(guard.login_timeout);
        guard.ensure_session(self.transport(), &budget).await?;
        let result = guard.session_mut()?.schema_info(kind, name).await;
        let (info, rows) = guard.observe(result)?;

        let generation = guard.generation;
        let stmt = self.shared.registry.insert_statement(id);
        guard.statements.insert(
            stmt,
            RequestHandle::from_result(format!("schema:{kind:?}"), info, rows, generation),
        );
        tracing::debug!(connection = %id, statement = %stmt, ?kind, rows, "schema info opened");
        Ok(stmt)
    }

    /// Ask the broker to cancel the operation running on `id`.
    ///
    /// Best effort: does nothing when the connection is idle or has no
    /// session. Never waits for the connection lock.
    pub async fn cancel(&self, id: ConnectionId) -> Result<()> {
        let slot = self.shared.registry.connection(id)?;
        if !slot.is_busy() {
            tracing::debug!(connection = %id, "nothing to cancel");
            return Ok(());
        }
        let target = slot.cancel_target.lock().clone();
        let Some(target) = target else {
            return Ok(());
        };
        tracing::info!(connection = %id, cas_pid = target.cas_pid, "cancelling running request");
        self.transport().cancel(&target).await?;
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Transaction status of the connection.
    pub async fn status(&self, id: ConnectionId) -> Result<ConnectionStatus> {
        let (_, guard) = self.lock_connection(id).await?;
        Ok(guard.status)
    }

    /// Metadata of the current session, if there is one.
    pub async fn session_info(&self, id: ConnectionId) -> Result<Option<SessionInfo>> {
        let (_, guard) = self.lock_connection(id).await?;
        Ok(guard.session.as_ref().map(|session| session.info().clone()))
    }

    /// Number of live connection handles.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.connection_count()
    }

    /// Number of live statement handles.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.shared.registry.statement_count()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("connections", &self.connection_count())
            .field("statements", &self.statement_count())
            .finish_non_exhaustive()
    }
}

/// Validate a savepoint name.
fn validate_identifier(name: &str) -> Result<()> {
    #[allow(clippy::expect_used)]
    static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_#$]{0,253}$").expect("identifier pattern compiles")
    });

    if name.is_empty() {
        return Err(Error::InvalidIdentifier(
            "identifier cannot be empty".into(),
        ));
    }

    if !IDENTIFIER_RE.is_match(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': must start with a letter or underscore, \
             contain only alphanumerics, _, # or $, and be at most 254 characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("sp1").is_ok());
        assert!(validate_identifier("_before_update").is_ok());
        assert!(validate_identifier("step#2").is_ok());
        assert!(validate_identifier(&"a".repeat(254)).is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1st").is_err());
        assert!(validate_identifier("sp; drop table t").is_err());
        assert!(validate_identifier("sp'").is_err());
        assert!(validate_identifier(&"a".repeat(255)).is_err());
    }

    #[test]
    fn test_park_key_ignores_options() {
        let a = Config::new()
            .host("db1")
            .database("demodb")
            .credentials("dba", "");
        let b = a.clone().autocommit(false).statement_pool(true);
        let c = a.clone().credentials("dba", "secret");
        assert!(ParkKey::of(&a) == ParkKey::of(&b));
        assert!(ParkKey::of(&a) != ParkKey::of(&c));
    }
}
