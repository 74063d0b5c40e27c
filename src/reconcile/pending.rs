//! Buffer for connections that reference pins not yet seen

use crate::model::{Connection, ConnectionId, PinId};
use crate::sync::metrics;
use std::collections::VecDeque;

/// Bounded FIFO of connections waiting for an endpoint pin
///
/// Keyed by connection ID: re-buffering a known ID replaces the entry in place.
/// When full, the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct PendingConnections {
    entries: VecDeque<Connection>,
    capacity: usize,
}

impl PendingConnections {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Buffer a connection, returning the entry evicted to make room, if any
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        if let Some(existing) = self.entries.iter_mut().find(|c| c.id == connection.id) {
            *existing = connection;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(ref dropped) = evicted {
            tracing::warn!(
                connection = %dropped.id,
                capacity = self.capacity,
                "Pending connection buffer full, evicting oldest entry"
            );
            metrics::record_pending_dropped("evicted");
        }
        self.entries.push_back(connection);
        evicted
    }

    /// Remove and return every buffered connection whose endpoints both satisfy
    /// `is_known`, in arrival order
    pub fn take_resolvable<F>(&mut self, is_known: F) -> Vec<Connection>
    where
        F: Fn(&PinId) -> bool,
    {
        let mut resolved = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for connection in self.entries.drain(..) {
            if is_known(&connection.source_id) && is_known(&connection.target_id) {
                resolved.push(connection);
            } else {
                kept.push_back(connection);
            }
        }
        self.entries = kept;
        resolved
    }

    /// Replace the whole buffer, keeping the newest `capacity` entries
    pub fn replace(&mut self, connections: Vec<Connection>) {
        self.entries.clear();
        for connection in connections {
            self.insert(connection);
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.iter().any(|c| &c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
