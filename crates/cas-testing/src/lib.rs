//! # cas-testing
//!
//! Test infrastructure for the CAS driver crates.
//!
//! [`MockServer`] is an in-process broker implementing
//! [`cas_protocol::Transport`]. It keeps call counters, serves canned result
//! sets, and lets tests script failures: hosts can be taken down, sessions
//! killed, and one-shot errors queued per operation.
//!
//! ```rust,ignore
//! use cas_testing::{MockServer, Op};
//! use cas_protocol::ProtocolError;
//!
//! let server = MockServer::new();
//! server.fail_next(Op::Execute, ProtocolError::Communication("reset".into()));
//! let driver = cas_client::Driver::new(server.transport());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_server;

pub use mock_server::{MockResult, MockServer, MockTransport, Op};
