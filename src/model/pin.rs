//! Pin data structure
//!
//! A named marker at a map coordinate. Matches the JSON the map server stores
//! and returns from `GET /pins`.

use super::wire::{deserialize_timestamp, empty_as_none, serialize_timestamp};
use super::PinId;
use crate::{PinSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A marker on the shared map
///
/// Immutable once created; identity is `id`. Unknown fields in the server JSON
/// (e.g. the embedded `connections` array) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: PinId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
    /// Reverse-geocoded place name, filled in by the server
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<String>,
    #[serde(
        rename = "timestamp",
        alias = "createdAt",
        default,
        deserialize_with = "deserialize_timestamp",
        serialize_with = "serialize_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

impl Pin {
    /// Create a pin with no image, location or timestamp
    pub fn new(id: impl Into<PinId>, name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lat,
            lng,
            image_url: None,
            location: None,
            created_at: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Check the structural constraints a pin from the server must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.id.is_blank() {
            return Err(PinSyncError::MalformedPayload("pin with empty id".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(PinSyncError::MalformedPayload(format!(
                "pin {} has an empty name",
                self.id
            )));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(PinSyncError::MalformedPayload(format!(
                "pin {} has latitude out of range: {}",
                self.id, self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(PinSyncError::MalformedPayload(format!(
                "pin {} has longitude out of range: {}",
                self.id, self.lng
            )));
        }
        Ok(())
    }
}
