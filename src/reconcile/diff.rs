//! Reconciliation result

use crate::model::{Connection, ConnectionId, Pin, PinId};
use serde::Serialize;

/// Entities added, updated or removed by one reconciliation
///
/// Removed entities carry their last known value so consumers can still render
/// them (e.g. "Deleted pin \"Home\"").
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub added_pins: Vec<Pin>,
    pub removed_pins: Vec<Pin>,
    pub updated_pins: Vec<Pin>,
    pub added_connections: Vec<Connection>,
    pub removed_connections: Vec<Connection>,
}

impl Diff {
    /// Check if the diff has any changes
    pub fn is_empty(&self) -> bool {
        self.added_pins.is_empty()
            && self.removed_pins.is_empty()
            && self.updated_pins.is_empty()
            && self.added_connections.is_empty()
            && self.removed_connections.is_empty()
    }

    /// Total number of changes
    pub fn change_count(&self) -> usize {
        self.added_pins.len()
            + self.removed_pins.len()
            + self.updated_pins.len()
            + self.added_connections.len()
            + self.removed_connections.len()
    }

    pub fn added_pin_ids(&self) -> Vec<&PinId> {
        self.added_pins.iter().map(|p| &p.id).collect()
    }

    pub fn removed_pin_ids(&self) -> Vec<&PinId> {
        self.removed_pins.iter().map(|p| &p.id).collect()
    }

    pub fn added_connection_ids(&self) -> Vec<&ConnectionId> {
        self.added_connections.iter().map(|c| &c.id).collect()
    }

    pub fn removed_connection_ids(&self) -> Vec<&ConnectionId> {
        self.removed_connections.iter().map(|c| &c.id).collect()
    }
}
