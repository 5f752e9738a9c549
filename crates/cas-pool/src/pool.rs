//! Datasource implementation.
//!
//! A datasource opens a fixed number of connections when it is created and
//! lends them out one borrower at a time. The number of idle connections is
//! mirrored by a semaphore: [`Datasource::borrow`] takes a permit,
//! [`Datasource::release`] gives one back, so a release wakes exactly one
//! waiting borrower.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cas_client::{Config, ConnectionId, ConnectionOwner, Driver, TransactionEnd};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, SlotState};

/// A fixed-size pool of driver connections.
///
/// Borrowed connections are ordinary driver connections. Handing one back
/// with [`release`](Self::release) or closing it with
/// [`Driver::disconnect`] both return it to the pool.
///
/// # Example
///
/// ```rust,ignore
/// use cas_driver_pool::{Datasource, PoolConfig};
///
/// let config = PoolConfig::new()
///     .url("cci:cubrid:localhost:33000:demodb:::")
///     .credentials("dba", "")
///     .pool_size(5);
///
/// let ds = Datasource::create(driver.clone(), config).await?;
/// let conn = ds.borrow().await?;
/// // Use connection...
/// ds.release(conn).await;
/// ```
#[derive(Clone)]
pub struct Datasource {
    inner: Arc<DatasourceInner>,
}

struct DatasourceInner {
    config: PoolConfig,
    driver: Driver,

    /// One entry per pooled connection.
    slots: Mutex<Vec<ConnectionMetadata>>,

    /// Permits equal the number of idle slots.
    idle: Semaphore,

    /// Whether the datasource has been destroyed.
    closed: AtomicBool,

    /// When the datasource was created.
    created_at: Instant,

    metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    borrows: u64,
    timeouts: u64,
    releases: u64,
    rejected_releases: u64,
}

impl Datasource {
    /// Create a new datasource builder.
    #[must_use]
    pub fn builder(driver: Driver) -> DatasourceBuilder {
        DatasourceBuilder::new(driver)
    }

    /// Open `pool_size` connections and start lending them.
    ///
    /// If any connection cannot be opened, the ones already opened are
    /// closed and the error is returned.
    pub async fn create(driver: Driver, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let client_config = config.client_config()?;

        let inner = Arc::new(DatasourceInner {
            config,
            driver,
            slots: Mutex::new(Vec::new()),
            idle: Semaphore::new(0),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });
        let weak = Arc::downgrade(&inner);
        let owner: Weak<dyn ConnectionOwner> = weak;

        let size = inner.config.pool_size;
        for _ in 0..size {
            match inner.open_connection(&client_config, &owner).await {
                Ok(id) => inner.slots.lock().push(ConnectionMetadata::new(id)),
                Err(err) => {
                    tracing::warn!(error = %err, "datasource connection failed, closing opened connections");
                    let opened = std::mem::take(&mut *inner.slots.lock());
                    for slot in opened {
                        inner.close_connection(slot.id, true).await;
                    }
                    return Err(err);
                }
            }
        }

        inner.idle.add_permits(size);
        tracing::info!(
            pool_size = size,
            max_wait_ms = inner.config.max_wait.as_millis() as u64,
            using_stmt_pool = inner.config.using_stmt_pool,
            "datasource created"
        );
        Ok(Self { inner })
    }

    /// Create a datasource from a property bag.
    ///
    /// See [`PoolConfig::from_properties`] for the recognised keys.
    pub async fn from_properties<I, K, V>(driver: Driver, properties: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::create(driver, PoolConfig::from_properties(properties)?).await
    }

    /// Borrow an idle connection.
    ///
    /// Waits up to `max_wait` for one to be released; with a zero
    /// `max_wait` an exhausted pool fails at once.
    pub async fn borrow(&self) -> Result<ConnectionId, PoolError> {
        if self.is_closed() {
            return Err(PoolError::InvalidDatasource);
        }

        let max_wait = self.inner.config.max_wait;
        let permit = if max_wait.is_zero() {
            self.inner.idle.try_acquire().map_err(|err| match err {
                tokio::sync::TryAcquireError::Closed => PoolError::InvalidDatasource,
                tokio::sync::TryAcquireError::NoPermits => self.timed_out(max_wait),
            })?
        } else {
            match tokio::time::timeout(max_wait, self.inner.idle.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::InvalidDatasource),
                Err(_) => return Err(self.timed_out(max_wait)),
            }
        };
        // Given back by `release`.
        permit.forget();

        let mut slots = self.inner.slots.lock();
        let Some(slot) = slots.iter_mut().find(|slot| slot.state == SlotState::Idle) else {
            drop(slots);
            // Destroyed after the permit was handed over.
            if self.is_closed() {
                return Err(PoolError::InvalidDatasource);
            }
            self.inner.idle.add_permits(1);
            return Err(self.timed_out(Duration::ZERO));
        };
        slot.mark_borrowed();
        let id = slot.id;
        drop(slots);

        self.inner.metrics.lock().borrows += 1;
        tracing::trace!(connection = %id, "connection borrowed");
        Ok(id)
    }

    fn timed_out(&self, waited: Duration) -> PoolError {
        self.inner.metrics.lock().timeouts += 1;
        tracing::debug!(waited_ms = waited.as_millis() as u64, "datasource exhausted");
        PoolError::PoolTimeout {
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Give a borrowed connection back.
    ///
    /// The connection is rolled back and becomes idle. Returns `false`, and
    /// leaves the connection alone, when `id` is not currently borrowed from
    /// this datasource.
    pub async fn release(&self, id: ConnectionId) -> bool {
        self.inner.release(id).await
    }

    /// Close every connection, borrowed or not, without waiting for
    /// borrowers. Pending and later borrows fail with
    /// [`PoolError::InvalidDatasource`].
    pub async fn destroy(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.idle.close();

        let slots = std::mem::take(&mut *self.inner.slots.lock());
        for slot in &slots {
            self.inner
                .close_connection(slot.id, slot.state == SlotState::Idle)
                .await;
        }
        tracing::info!(connections = slots.len(), "datasource destroyed");
    }

    /// Check if the datasource has been destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let slots = self.inner.slots.lock();
        let in_use = slots.iter().filter(|slot| slot.is_borrowed()).count();
        PoolStatus {
            available: slots.len() - in_use,
            in_use,
            total: slots.len(),
            max: self.inner.config.pool_size,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            borrows: inner.borrows,
            timeouts: inner.timeouts,
            releases: inner.releases,
            rejected_releases: inner.rejected_releases,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Snapshot of every pooled connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionMetadata> {
        self.inner.slots.lock().clone()
    }

    /// Get the datasource configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DatasourceInner {
    async fn open_connection(
        &self,
        config: &Config,
        owner: &Weak<dyn ConnectionOwner>,
    ) -> Result<ConnectionId, PoolError> {
        let id = self.driver.connect(config.clone()).await?;
        if let Err(err) = self.driver.set_owner(id, owner.clone()) {
            self.close_connection(id, true).await;
            return Err(err.into());
        }
        self.metrics.lock().connections_created += 1;
        Ok(id)
    }

    fn is_borrowed(&self, id: ConnectionId) -> bool {
        self.slots
            .lock()
            .iter()
            .any(|slot| slot.id == id && slot.is_borrowed())
    }

    async fn release(&self, id: ConnectionId) -> bool {
        if self.closed.load(Ordering::Acquire) || !self.is_borrowed(id) {
            self.metrics.lock().rejected_releases += 1;
            tracing::debug!(connection = %id, "release of a connection not borrowed from this datasource");
            return false;
        }

        // Rolled back while the borrower still holds it; only the state flip
        // below decides which of two concurrent releases wins.
        if let Err(err) = self.driver.end_tran(id, TransactionEnd::Rollback).await {
            tracing::debug!(connection = %id, error = %err, "rollback on release failed");
        }

        let released = {
            let mut slots = self.slots.lock();
            match slots.iter_mut().find(|slot| slot.id == id && slot.is_borrowed()) {
                Some(slot) => {
                    slot.mark_idle();
                    true
                }
                None => false,
            }
        };

        if released {
            self.idle.add_permits(1);
            self.metrics.lock().releases += 1;
            tracing::trace!(connection = %id, "connection released");
        } else {
            self.metrics.lock().rejected_releases += 1;
        }
        released
    }

    async fn close_connection(&self, id: ConnectionId, graceful: bool) {
        match self.driver.force_disconnect(id, graceful).await {
            Ok(()) => self.metrics.lock().connections_closed += 1,
            Err(err) => tracing::debug!(connection = %id, error = %err, "closing pooled connection failed"),
        }
    }
}

#[async_trait]
impl ConnectionOwner for DatasourceInner {
    async fn reclaim(&self, id: ConnectionId) -> bool {
        self.release(id).await
    }
}

/// Builder for creating a datasource.
///
/// # Example
///
/// ```rust,ignore
/// let ds = Datasource::builder(driver)
///     .url("cci:cubrid:localhost:33000:demodb:::")
///     .credentials("dba", "")
///     .pool_size(4)
///     .build()
///     .await?;
/// ```
pub struct DatasourceBuilder {
    driver: Driver,
    pool_config: PoolConfig,
}

impl DatasourceBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the whole pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.pool_config.url = url.into();
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.pool_config = self.pool_config.credentials(user, password);
        self
    }

    /// Set the number of connections.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_config.pool_size = size;
        self
    }

    /// Set the borrow wait.
    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.pool_config.max_wait = wait;
        self
    }

    /// Enable or disable the statement cache.
    #[must_use]
    pub fn using_stmt_pool(mut self, enabled: bool) -> Self {
        self.pool_config.using_stmt_pool = enabled;
        self
    }

    /// Build the datasource.
    pub async fn build(self) -> Result<Datasource, PoolError> {
        Datasource::create(self.driver, self.pool_config).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections.
    pub available: usize,
    /// Number of borrowed connections.
    pub in_use: usize,
    /// Total number of connections.
    pub total: usize,
    /// Configured pool size.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if every connection is borrowed.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Connections opened since creation.
    pub connections_created: u64,
    /// Connections closed since creation.
    pub connections_closed: u64,
    /// Successful borrows.
    pub borrows: u64,
    /// Borrows that gave up after `max_wait`.
    pub timeouts: u64,
    /// Accepted releases.
    pub releases: u64,
    /// Releases of connections not borrowed from the pool.
    pub rejected_releases: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate borrow success rate (0.0 to 1.0).
    #[must_use]
    pub fn borrow_success_rate(&self) -> f64 {
        let total = self.borrows + self.timeouts;
        if total == 0 {
            return 1.0;
        }
        self.borrows as f64 / total as f64
    }
}
