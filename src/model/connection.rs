//! Connection data structure

use super::wire::{deserialize_timestamp, serialize_timestamp};
use super::{ConnectionId, PinId};
use crate::{PinSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A link between two pins
///
/// Both endpoints reference pins known to the server. Treated as immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_id: PinId,
    pub target_id: PinId,
    #[serde(
        rename = "timestamp",
        alias = "createdAt",
        default,
        deserialize_with = "deserialize_timestamp",
        serialize_with = "serialize_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(
        id: impl Into<ConnectionId>,
        source_id: impl Into<PinId>,
        target_id: impl Into<PinId>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Whether either endpoint is the given pin
    pub fn touches(&self, pin: &PinId) -> bool {
        &self.source_id == pin || &self.target_id == pin
    }

    /// Both endpoint IDs
    pub fn endpoints(&self) -> [&PinId; 2] {
        [&self.source_id, &self.target_id]
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_blank() {
            return Err(PinSyncError::MalformedPayload(
                "connection with empty id".to_string(),
            ));
        }
        if self.source_id.is_blank() || self.target_id.is_blank() {
            return Err(PinSyncError::MalformedPayload(format!(
                "connection {} has an empty endpoint",
                self.id
            )));
        }
        Ok(())
    }
}
