//! Pooled connection state and bookkeeping.

use std::time::Instant;

use cas_client::ConnectionId;

/// Where a pooled connection is in its borrow cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Waiting in the pool.
    Idle,
    /// Handed out by [`borrow`](crate::Datasource::borrow).
    Borrowed,
}

/// Metadata tracked for each pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Driver id of the connection.
    pub id: ConnectionId,
    /// Current state.
    pub state: SlotState,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last borrowed.
    pub last_borrowed: Option<Instant>,
    /// How many times the connection has been borrowed.
    pub borrow_count: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SlotState::Idle,
            created_at: Instant::now(),
            last_borrowed: None,
            borrow_count: 0,
        }
    }

    pub(crate) fn mark_borrowed(&mut self) {
        self.state = SlotState::Borrowed;
        self.last_borrowed = Some(Instant::now());
        self.borrow_count += 1;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = SlotState::Idle;
    }

    /// Check whether the connection is handed out.
    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        self.state == SlotState::Borrowed
    }

    /// Age of the connection.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}
