//! Activity entries and the records they are built from

use crate::model::{Connection, ConnectionId, Pin, PinId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PinCreated,
    PinDeleted,
    ConnectionCreated,
    ConnectionDeleted,
    Notice,
}

impl ActivityKind {
    /// Creation kinds are deduplicated by entity ID
    pub fn is_creation(self) -> bool {
        matches!(self, Self::PinCreated | Self::ConnectionCreated)
    }
}

/// Something worth telling the user about, with the data needed to describe it
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityRecord {
    PinCreated(Pin),
    PinDeleted(Pin),
    ConnectionCreated {
        connection: Connection,
        source_name: Option<String>,
        target_name: Option<String>,
    },
    ConnectionDeleted {
        connection: Connection,
        source_name: Option<String>,
        target_name: Option<String>,
    },
    /// Free text pushed by the server (`activity_update`)
    Notice(String),
}

impl ActivityRecord {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::PinCreated(_) => ActivityKind::PinCreated,
            Self::PinDeleted(_) => ActivityKind::PinDeleted,
            Self::ConnectionCreated { .. } => ActivityKind::ConnectionCreated,
            Self::ConnectionDeleted { .. } => ActivityKind::ConnectionDeleted,
            Self::Notice(_) => ActivityKind::Notice,
        }
    }

    /// Display text for the feed
    pub fn message(&self) -> String {
        match self {
            Self::PinCreated(pin) => format!("📍 Created pin \"{}\"", pin.name.trim()),
            Self::PinDeleted(pin) => format!("🗑️ Deleted pin \"{}\"", pin.name.trim()),
            Self::ConnectionCreated {
                connection,
                source_name,
                target_name,
            } => format!(
                "{} ❤️ {}",
                display_name(source_name, &connection.source_id),
                display_name(target_name, &connection.target_id)
            ),
            Self::ConnectionDeleted {
                connection,
                source_name,
                target_name,
            } => format!(
                "{} 💔 {}",
                display_name(source_name, &connection.source_id),
                display_name(target_name, &connection.target_id)
            ),
            Self::Notice(text) => text.trim().to_string(),
        }
    }

    /// The payload's own timestamp, for creation kinds
    pub fn payload_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::PinCreated(pin) => pin.created_at,
            Self::ConnectionCreated { connection, .. } => connection.created_at,
            Self::PinDeleted(_) | Self::ConnectionDeleted { .. } | Self::Notice(_) => None,
        }
    }

    pub fn pin_id(&self) -> Option<&PinId> {
        match self {
            Self::PinCreated(pin) | Self::PinDeleted(pin) => Some(&pin.id),
            _ => None,
        }
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            Self::ConnectionCreated { connection, .. }
            | Self::ConnectionDeleted { connection, .. } => Some(&connection.id),
            _ => None,
        }
    }

    fn image_url(&self) -> Option<&str> {
        match self {
            Self::PinCreated(pin) => pin.image_url.as_deref(),
            _ => None,
        }
    }
}

fn display_name<'a>(name: &'a Option<String>, fallback: &'a PinId) -> &'a str {
    name.as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.as_str())
}

/// One line of the activity feed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_pin_id: Option<PinId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_connection_id: Option<ConnectionId>,
    /// Pin image shown next to creation entries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ActivityEntry {
    pub(crate) fn from_record(record: &ActivityRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: record.kind(),
            timestamp,
            message: record.message(),
            referenced_pin_id: record.pin_id().cloned(),
            referenced_connection_id: record.connection_id().cloned(),
            image_url: record.image_url().map(str::to_string),
        }
    }

    /// Whether this entry describes the same creation as `record`
    pub(crate) fn duplicates(&self, record: &ActivityRecord) -> bool {
        if self.kind != record.kind() || !self.kind.is_creation() {
            return false;
        }
        match record.kind() {
            ActivityKind::PinCreated => {
                self.referenced_pin_id.is_some() && self.referenced_pin_id.as_ref() == record.pin_id()
            }
            ActivityKind::ConnectionCreated => {
                self.referenced_connection_id.is_some()
                    && self.referenced_connection_id.as_ref() == record.connection_id()
            }
            _ => false,
        }
    }
}
