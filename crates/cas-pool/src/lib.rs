//! # cas-driver-pool
//!
//! Fixed-size datasource for the CAS client.
//!
//! A datasource opens all of its connections up front and lends them to
//! one borrower at a time. Returning a connection rolls back whatever the
//! borrower left open.
//!
//! ## Features
//!
//! - Connections opened eagerly; a partial failure closes the rest
//! - Bounded borrow wait (`max_wait`), immediate failure when it is zero
//! - Release wakes exactly one waiting borrower
//! - [`Driver::disconnect`](cas_client::Driver::disconnect) on a borrowed
//!   connection returns it to the pool
//! - Configuration from a property bag, compatible with the C client's
//!   datasource keys
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use cas_driver_pool::Datasource;
//!
//! let ds = Datasource::from_properties(driver.clone(), [
//!     ("user", "dba"),
//!     ("url", "cci:cubrid:localhost:33000:demodb:::"),
//!     ("pool_size", "4"),
//!     ("max_wait", "500"),
//! ])
//! .await?;
//!
//! let conn = ds.borrow().await?;
//! // Use connection...
//! driver.disconnect(conn).await?; // back to the pool
//!
//! let status = ds.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! ds.destroy().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Datasource, DatasourceBuilder, PoolMetrics, PoolStatus};

// Lifecycle management
pub use lifecycle::{ConnectionMetadata, SlotState};
