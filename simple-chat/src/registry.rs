use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::{server::Connection, session::SessionId};

/// Every live connection on the relay, keyed by session id.
///
/// One mutex guards registration, removal and iteration. Visitors run while
/// the lock is held, so they must not block; [`Connection::send`] only queues.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<SessionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Connection) {
        let mut connections = self.lock();
        connections.insert(connection.id(), connection);
    }

    pub fn unregister(&self, id: SessionId) -> Option<Connection> {
        let mut connections = self.lock();
        connections.remove(&id)
    }

    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Connection),
    {
        let connections = self.lock();
        for connection in connections.values() {
            visitor(connection);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Asks every registered connection to hang up. Entries are removed by
    /// their own tasks as they finish.
    pub fn disconnect_all(&self) -> usize {
        let connections = self.lock();
        for connection in connections.values() {
            connection.close();
        }
        debug!(count = connections.len(), "disconnecting all sessions");
        connections.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Connection>> {
        // A panicking visitor must not wedge the relay for everyone else.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
