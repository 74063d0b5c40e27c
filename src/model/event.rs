//! Incremental events delivered over the push stream

use super::{Connection, Pin};
use crate::{PinSyncError, Result};
use serde::{Deserialize, Serialize};

/// A single-entity delta pushed by the server
///
/// Wire shape: `{"type": "pin_added", "pin": {...}}`,
/// `{"type": "connection_added", "connection": {...}}`,
/// `{"type": "activity_update", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncrementalEvent {
    PinAdded {
        pin: Pin,
    },
    ConnectionAdded {
        connection: Connection,
    },
    ActivityUpdate {
        #[serde(alias = "text")]
        message: String,
    },
}

impl IncrementalEvent {
    /// Parse and validate one push message
    pub fn parse(message: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(message.trim())
            .map_err(|e| PinSyncError::MalformedPayload(format!("push message: {}", e)))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::PinAdded { pin } => pin.validate(),
            Self::ConnectionAdded { connection } => connection.validate(),
            Self::ActivityUpdate { .. } => Ok(()),
        }
    }

    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PinAdded { .. } => "pin_added",
            Self::ConnectionAdded { .. } => "connection_added",
            Self::ActivityUpdate { .. } => "activity_update",
        }
    }
}

impl From<Pin> for IncrementalEvent {
    fn from(pin: Pin) -> Self {
        Self::PinAdded { pin }
    }
}

impl From<Connection> for IncrementalEvent {
    fn from(connection: Connection) -> Self {
        Self::ConnectionAdded { connection }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pin_added() {
        let msg = r#"{"type": "pin_added", "pin": {"id": "p1", "name": "A", "lat": 1.5, "lng": 2.5, "imageUrl": "", "timestamp": "2024-01-01T00:00:00"}}"#;
        let event = IncrementalEvent::parse(msg).unwrap();
        assert_eq!(event.kind(), "pin_added");
        match event {
            IncrementalEvent::PinAdded { pin } => assert_eq!(pin.id.as_str(), "p1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_connection_added() {
        let msg = r#"{"type": "connection_added", "connection": {"id": "c1", "sourceId": "p1", "targetId": "p2", "timestamp": ""}}"#;
        assert!(matches!(
            IncrementalEvent::parse(msg).unwrap(),
            IncrementalEvent::ConnectionAdded { .. }
        ));
    }

    #[test]
    fn test_parse_activity_update_text_alias() {
        let msg = r#"{"type": "activity_update", "text": "server restarting"}"#;
        assert_eq!(
            IncrementalEvent::parse(msg).unwrap(),
            IncrementalEvent::ActivityUpdate {
                message: "server restarting".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = IncrementalEvent::parse(r#"{"type": "pin_moved", "pin": {}}"#).unwrap_err();
        assert!(matches!(err, PinSyncError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_entity_is_malformed() {
        let msg = r#"{"type": "pin_added", "pin": {"id": "p1", "name": "", "lat": 0, "lng": 0}}"#;
        assert!(IncrementalEvent::parse(msg).is_err());
    }
}
