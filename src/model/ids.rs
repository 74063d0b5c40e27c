//! Type-safe ID wrappers for pins and connections

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type-safe wrapper for pin IDs
///
/// Server-assigned (a UUID string in practice). Prevents mixing up pin IDs with
/// connection IDs at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(String);

impl PinId {
    /// Create a new PinId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the ID is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PinId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for PinId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Type-safe wrapper for connection IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new ConnectionId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the ID is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_id_creation() {
        let id = PinId::new("p-1");
        assert_eq!(id.as_str(), "p-1");
        assert_eq!(format!("{}", id), "p-1");
        assert!(!id.is_blank());
    }

    #[test]
    fn test_blank_ids() {
        assert!(PinId::new("   ").is_blank());
        assert!(ConnectionId::new("").is_blank());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&ConnectionId::new("c1")).unwrap();
        assert_eq!(json, "\"c1\"");
        let id: PinId = serde_json::from_str("\"p9\"").unwrap();
        assert_eq!(id, PinId::new("p9"));
    }
}
