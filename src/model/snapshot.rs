//! Full point-in-time views of the server state

use super::envelope::decode_field;
use super::{Connection, Pin};
use crate::{PinSyncError, Result};
use std::collections::HashSet;

/// Undecoded snapshot bodies, as fetched
///
/// The poller compares these byte-for-byte against the previous fetch before
/// paying for decoding and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawSnapshot {
    /// Body of `GET /pins`
    pub pins: String,
    /// Body of `GET /connections`
    pub connections: String,
}

impl RawSnapshot {
    pub fn new(pins: impl Into<String>, connections: impl Into<String>) -> Self {
        Self {
            pins: pins.into(),
            connections: connections.into(),
        }
    }

    /// Decode both envelopes into a validated [`Snapshot`]
    pub fn decode(&self) -> Result<Snapshot> {
        let pins: Vec<Pin> = decode_field(&self.pins, "pins")?;
        let connections: Vec<Connection> = decode_field(&self.connections, "connections")?;
        let snapshot = Snapshot { pins, connections };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Full set of pins and connections from the server
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub pins: Vec<Pin>,
    pub connections: Vec<Connection>,
}

impl Snapshot {
    pub fn new(pins: Vec<Pin>, connections: Vec<Connection>) -> Self {
        Self { pins, connections }
    }

    /// Validate every entity and reject repeated IDs
    pub fn validate(&self) -> Result<()> {
        let mut pin_ids = HashSet::with_capacity(self.pins.len());
        for pin in &self.pins {
            pin.validate()?;
            if !pin_ids.insert(&pin.id) {
                return Err(PinSyncError::MalformedPayload(format!(
                    "snapshot lists pin {} twice",
                    pin.id
                )));
            }
        }

        let mut connection_ids = HashSet::with_capacity(self.connections.len());
        for connection in &self.connections {
            connection.validate()?;
            if !connection_ids.insert(&connection.id) {
                return Err(PinSyncError::MalformedPayload(format!(
                    "snapshot lists connection {} twice",
                    connection.id
                )));
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty() && self.connections.is_empty()
    }
}
