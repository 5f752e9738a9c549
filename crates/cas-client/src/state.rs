//! Connection status.
//!
//! A connection moves between three states:
//!
//! ```text
//!   Disconnected --connect--> OutOfTransaction --execute (autocommit off)--> InTransaction
//!        ^                          ^    |                                        |
//!        |                          |    +------------- end_tran <----------------+
//!        +--- communication failure / query-timeout disconnect (from any state) -+
//! ```
//!
//! Only a connection that was not `InTransaction` when an operation started
//! may transparently reconnect and replay that operation.

use std::fmt;

/// Transaction status of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// No live session.
    #[default]
    Disconnected,
    /// Live session without uncommitted work.
    OutOfTransaction,
    /// Live session with uncommitted work.
    InTransaction,
}

impl ConnectionStatus {
    /// Check whether uncommitted work may exist on the server.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        matches!(self, Self::InTransaction)
    }

    /// Check whether a session is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::OutOfTransaction => "out-of-transaction",
            Self::InTransaction => "in-transaction",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(!ConnectionStatus::Disconnected.is_connected());
        assert!(ConnectionStatus::OutOfTransaction.is_connected());
        assert!(ConnectionStatus::InTransaction.is_in_transaction());
        assert!(!ConnectionStatus::OutOfTransaction.is_in_transaction());
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }
}
