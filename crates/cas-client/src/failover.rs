//! Reconnect and failover.
//!
//! [`ConnectionHandle::reconnect`] decides whether the current session can be
//! kept, and otherwise walks the host list:
//!
//! 1. the host used last (primary, or the alternate failed over to),
//! 2. each alternate in configured order, skipping the one just tried.
//!
//! Every attempt gets whatever remains of the operation's budget. A new
//! session bumps the connection generation, which invalidates every request
//! handle prepared on the old one.

use std::time::Duration;

use cas_protocol::{
    CancelTarget, ConnectRequest, DbParameter, HostAddr, ProtocolError, Session, Transport,
};
use tokio::time::Instant;

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::state::ConnectionStatus;

/// Time left for one caller-visible operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeBudget {
    started: Instant,
    limit: Option<Duration>,
}

impl TimeBudget {
    pub(crate) fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn remaining(&self) -> Option<Option<Duration>> {
        match self.limit {
            None => Some(None),
            Some(limit) => limit
                .checked_sub(self.started.elapsed())
                .filter(|left| !left.is_zero())
                .map(Some),
        }
    }

    /// Remaining time for a connect attempt.
    pub(crate) fn login_remaining(&self) -> Result<Option<Duration>> {
        self.remaining().ok_or(Error::LoginTimeout)
    }

    /// Remaining time for a request.
    pub(crate) fn query_remaining(&self) -> Result<Option<Duration>> {
        self.remaining().ok_or(Error::QueryTimeout)
    }
}

/// Outcome of [`ConnectionHandle::reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconnect {
    /// The existing session passed the liveness check.
    Reused,
    /// A new session was opened; prepared state must be rebuilt.
    Established,
}

impl ConnectionHandle {
    /// Make sure a live session exists, opening one if needed.
    ///
    /// Outside a transaction an existing session is probed first; inside a
    /// transaction it is trusted, since a probe failure could not be
    /// recovered from anyway.
    pub(crate) async fn ensure_session(
        &mut self,
        transport: &dyn Transport,
        budget: &TimeBudget,
    ) -> Result<Reconnect> {
        if self.status.is_in_transaction() && self.session.is_some() {
            return Ok(Reconnect::Reused);
        }
        self.reconnect(transport, budget).await
    }

    /// Keep the session if it is alive, otherwise fail over.
    pub(crate) async fn reconnect(
        &mut self,
        transport: &dyn Transport,
        budget: &TimeBudget,
    ) -> Result<Reconnect> {
        if self.is_closed() {
            return Err(Error::ConnectionNotFound(self.id));
        }
        budget.login_remaining()?;

        if let Some(session) = self.session.as_mut() {
            match session.check_liveness().await {
                Ok(()) => return Ok(Reconnect::Reused),
                Err(err) => {
                    tracing::debug!(connection = %self.id, error = %err, "liveness check failed");
                    self.drop_session();
                }
            }
        }

        let first = self.host_index;
        let order = std::iter::once(first).chain(
            (0..self.config.alternate_hosts.len())
                .map(Some)
                .filter(move |index| *index != first),
        );

        let mut last_error = None;
        for index in order {
            let addr = self.host_addr(index);
            let timeout = budget.login_remaining()?;
            let request = ConnectRequest {
                addr: addr.clone(),
                database: self.config.database.clone(),
                user: self.config.user.clone(),
                password: self.config.password.clone(),
                retry: self.config.alternate_hosts.is_empty(),
                timeout,
            };

            match transport.connect(&request).await {
                Ok(mut session) if self.is_closed() => {
                    tracing::debug!(connection = %self.id, "connection freed while connecting, closing new session");
                    if let Err(err) = session.close().await {
                        tracing::debug!(connection = %self.id, error = %err, "closing new session failed");
                    }
                    return Err(Error::ConnectionNotFound(self.id));
                }
                Ok(session) => {
                    self.install(session, index, addr).await;
                    return Ok(Reconnect::Established);
                }
                Err(err) => {
                    tracing::warn!(
                        connection = %self.id,
                        host = %addr,
                        error = %err,
                        "connect attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(ProtocolError::QueryTimeout | ProtocolError::LoginTimeout) => Error::LoginTimeout,
            Some(err) => err.into(),
            None => Error::Connect {
                host: self.config.host.clone(),
                port: self.config.port,
                reason: "no host to connect to".into(),
            },
        })
    }

    fn host_addr(&self, index: Option<usize>) -> HostAddr {
        index
            .and_then(|i| self.config.alternate_hosts.get(i).cloned())
            .unwrap_or_else(|| self.config.primary())
    }

    async fn install(&mut self, mut session: Box<dyn Session>, index: Option<usize>, addr: HostAddr) {
        let info = session.info().clone();

        if let Some(level) = self.isolation {
            if let Err(err) = session
                .set_db_parameter(DbParameter::IsolationLevel, level.code())
                .await
            {
                tracing::debug!(connection = %self.id, error = %err, "restoring isolation level failed");
            }
        }

        *self.cancel_target.lock() = Some(CancelTarget {
            addr: addr.clone(),
            cas_pid: info.cas_pid,
        });
        self.session = Some(session);
        self.status = ConnectionStatus::OutOfTransaction;
        self.generation += 1;

        match index {
            Some(_) if self.host_index != index || self.failed_over_at.is_none() => {
                self.failed_over_at = Some(Instant::now());
            }
            Some(_) => {}
            None => self.failed_over_at = None,
        }
        if index.is_some() {
            tracing::warn!(connection = %self.id, host = %addr, "failed over to alternate host");
        }
        self.host_index = index;

        tracing::info!(
            connection = %self.id,
            host = %addr,
            session_id = info.session_id,
            cas_pid = info.cas_pid,
            generation = self.generation,
            "session established"
        );
    }

    /// Drop the session without telling the server.
    pub(crate) fn drop_session(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!(connection = %self.id, "session dropped");
        }
        *self.cancel_target.lock() = None;
        self.status = ConnectionStatus::Disconnected;
    }

    /// Close the session gracefully; errors are only logged.
    pub(crate) async fn close_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.close().await {
                tracing::debug!(connection = %self.id, error = %err, "graceful close failed");
            }
        }
        self.drop_session();
    }

    /// Return to the primary host once `rc_time` has passed since a
    /// failover. Called between transactions only.
    pub(crate) async fn fail_back_if_due(&mut self) {
        let Some(since) = self.failed_over_at else {
            return;
        };
        if self.host_index.is_none() || since.elapsed() < self.config.rc_time {
            return;
        }
        tracing::info!(connection = %self.id, "rc_time elapsed, returning to primary host");
        self.close_session().await;
        self.host_index = None;
        self.failed_over_at = None;
    }
}
