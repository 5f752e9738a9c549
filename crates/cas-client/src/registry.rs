//! Handle registry.
//!
//! Connection and statement ids are slot indices paired with a generation
//! counter. Freeing a slot bumps its generation, so an id held past `free`
//! never resolves to whatever reuses the slot later.
//!
//! The registry lock is a short synchronous `parking_lot` mutex; it is never
//! held across an `.await`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::ConnectionSlot;
use crate::error::{Error, Result};

/// Generation-checked slot reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Slot index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the id was issued.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Identifies a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(HandleId);

/// Identifies a statement (request) handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(HandleId);

impl ConnectionId {
    /// Underlying slot reference.
    #[must_use]
    pub fn handle(&self) -> HandleId {
        self.0
    }
}

impl StatementId {
    /// Underlying slot reference.
    #[must_use]
    pub fn handle(&self) -> HandleId {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "con#{}", self.0)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Slot arena with generation-checked ids.
pub(crate) struct Arena<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub(crate) fn insert_with(&mut self, build: impl FnOnce(HandleId) -> T) -> HandleId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index as usize];
            let generation = match slot {
                Entry::Vacant { generation } => *generation,
                Entry::Occupied { generation, .. } => generation.wrapping_add(1),
            };
            let id = HandleId { index, generation };
            *slot = Entry::Occupied {
                generation,
                value: build(id),
            };
            return id;
        }

        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        let id = HandleId {
            index,
            generation: 0,
        };
        self.entries.push(Entry::Occupied {
            generation: 0,
            value: build(id),
        });
        id
    }

    pub(crate) fn get(&self, id: HandleId) -> Option<&T> {
        match self.entries.get(id.index as usize)? {
            Entry::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, id: HandleId) -> Option<T> {
        let slot = self.entries.get_mut(id.index as usize)?;
        let current = match slot {
            Entry::Occupied { generation, .. } => *generation,
            Entry::Vacant { .. } => return None,
        };
        if current != id.generation {
            return None;
        }

        let next = Entry::Vacant {
            generation: current.wrapping_add(1),
        };
        let Entry::Occupied { value, .. } = std::mem::replace(slot, next) else {
            return None;
        };
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for (index, slot) in self.entries.iter_mut().enumerate() {
            let doomed = match slot {
                Entry::Occupied { generation, value } if !keep(value) => Some(*generation),
                _ => None,
            };
            if let Some(generation) = doomed {
                *slot = Entry::Vacant {
                    generation: generation.wrapping_add(1),
                };
                self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
                self.len -= 1;
            }
        }
    }
}

#[derive(Default)]
struct Tables {
    connections: Arena<Arc<ConnectionSlot>>,
    statements: Arena<ConnectionId>,
}

/// Maps ids to connection slots and statement owners.
#[derive(Default)]
pub(crate) struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub(crate) fn insert_connection(
        &self,
        build: impl FnOnce(ConnectionId) -> ConnectionSlot,
    ) -> ConnectionId {
        let mut tables = self.tables.lock();
        let handle = tables
            .connections
            .insert_with(|id| Arc::new(build(ConnectionId(id))));
        ConnectionId(handle)
    }

    pub(crate) fn connection(&self, id: ConnectionId) -> Result<Arc<ConnectionSlot>> {
        self.tables
            .lock()
            .connections
            .get(id.0)
            .cloned()
            .ok_or(Error::ConnectionNotFound(id))
    }

    /// Free a connection and every statement it owns.
    pub(crate) fn remove_connection(&self, id: ConnectionId) -> Option<Arc<ConnectionSlot>> {
        let mut tables = self.tables.lock();
        let slot = tables.connections.remove(id.0)?;
        tables.statements.retain(|owner| *owner != id);
        Some(slot)
    }

    pub(crate) fn insert_statement(&self, owner: ConnectionId) -> StatementId {
        StatementId(self.tables.lock().statements.insert_with(|_| owner))
    }

    /// Resolve a statement to its owning connection in one locked step.
    pub(crate) fn statement_owner(
        &self,
        id: StatementId,
    ) -> Result<(ConnectionId, Arc<ConnectionSlot>)> {
        let tables = self.tables.lock();
        let owner = *tables
            .statements
            .get(id.0)
            .ok_or(Error::StatementNotFound(id))?;
        let slot = tables
            .connections
            .get(owner.0)
            .cloned()
            .ok_or(Error::StatementNotFound(id))?;
        Ok((owner, slot))
    }

    pub(crate) fn remove_statement(&self, id: StatementId) {
        self.tables.lock().statements.remove(id.0);
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.tables.lock().connections.len()
    }

    pub(crate) fn statement_count(&self) -> usize {
        self.tables.lock().statements.len()
    }
}
