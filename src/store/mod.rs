//! Local mirror of the server's pins and connections
//!
//! The store is a plain keyed container. It does no networking and no
//! validation beyond identity: inserting an entity with a known ID replaces it.
//! All writes take `&mut self`, so a reader can never observe a half-applied
//! reconciliation; the [`Reconciler`](crate::reconcile::Reconciler) is the only
//! writer.

use crate::model::{Connection, ConnectionId, Pin, PinId, Snapshot};
use std::collections::BTreeMap;

/// Immutable copy of the store contents, used for comparison
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreSnapshot {
    pub pins: BTreeMap<PinId, Pin>,
    pub connections: BTreeMap<ConnectionId, Connection>,
}

impl StoreSnapshot {
    /// Flatten into a wire-shaped [`Snapshot`], ordered by ID
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.pins.values().cloned().collect(),
            self.connections.values().cloned().collect(),
        )
    }
}

/// Pins and connections keyed by identity
#[derive(Debug, Default)]
pub struct StateStore {
    pins: BTreeMap<PinId, Pin>,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_pin(&self, id: &PinId) -> Option<&Pin> {
        self.pins.get(id)
    }

    pub fn contains_pin(&self, id: &PinId) -> bool {
        self.pins.contains_key(id)
    }

    /// Insert or replace a pin, returning the previous value
    pub fn insert_pin(&mut self, pin: Pin) -> Option<Pin> {
        self.pins.insert(pin.id.clone(), pin)
    }

    pub fn remove_pin(&mut self, id: &PinId) -> Option<Pin> {
        self.pins.remove(id)
    }

    pub fn get_connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn contains_connection(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Insert or replace a connection, returning the previous value
    pub fn insert_connection(&mut self, connection: Connection) -> Option<Connection> {
        self.connections.insert(connection.id.clone(), connection)
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Connections with the given pin at either end
    pub fn connections_of(&self, pin: &PinId) -> Vec<&Connection> {
        self.connections
            .values()
            .filter(|c| c.touches(pin))
            .collect()
    }

    /// Display name of a pin, if known
    pub fn pin_name(&self, id: &PinId) -> Option<&str> {
        self.pins.get(id).map(|p| p.name.as_str())
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty() && self.connections.is_empty()
    }

    /// Immutable copy of the current contents
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            pins: self.pins.clone(),
            connections: self.connections.clone(),
        }
    }

    /// Drop everything (explicit session reset)
    pub fn clear(&mut self) {
        self.pins.clear();
        self.connections.clear();
    }
}
