//! Response envelope shared by every REST endpoint
//!
//! `{"status": "success" | "error", "message": "...", <payload field>: ...}`

use crate::{PinSyncError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Decoded envelope header
#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    status: ResponseStatus,
    #[serde(default)]
    message: Option<String>,
}

/// Decode an envelope body and extract its payload field
///
/// An `error` envelope becomes [`PinSyncError::Server`]. A body that is not JSON,
/// lacks a status, or lacks the payload field on success is
/// [`PinSyncError::MalformedPayload`].
pub fn decode_field<T: DeserializeOwned>(body: &str, field: &str) -> Result<T> {
    let mut value = check_status(body)?;
    let payload = value
        .get_mut(field)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            PinSyncError::MalformedPayload(format!("success response without `{}`", field))
        })?;

    serde_json::from_value(payload)
        .map_err(|e| PinSyncError::MalformedPayload(format!("invalid `{}`: {}", field, e)))
}

/// Decode an envelope that carries no payload (e.g. a delete acknowledgement)
pub fn decode_ack(body: &str) -> Result<()> {
    check_status(body).map(|_| ())
}

fn check_status(body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PinSyncError::MalformedPayload(format!("response is not JSON: {}", e)))?;
    let header: EnvelopeHeader = serde_json::from_value(value.clone())
        .map_err(|e| PinSyncError::MalformedPayload(format!("invalid envelope: {}", e)))?;

    match header.status {
        ResponseStatus::Success => Ok(value),
        ResponseStatus::Error => Err(PinSyncError::Server(
            header
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        )),
    }
}
