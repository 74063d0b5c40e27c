//! Error types for pinsync
//!
//! Defines one error enum covering every failure mode of the sync engine and its
//! HTTP transport. Uses thiserror for ergonomic error handling.

use crate::retry::{RetryDecision, RetryableError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pinsync operations
pub type Result<T> = std::result::Result<T, PinSyncError>;

/// Error type for pinsync operations
#[derive(Error, Debug)]
pub enum PinSyncError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/transport errors not raised by reqwest itself
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a `status: "error"` envelope
    #[error("Server error: {0}")]
    Server(String),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// A snapshot or push message failed decoding or validation
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    /// Rate limited (retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

impl PinSyncError {
    /// True for payloads that were rejected rather than failed to arrive
    pub fn is_malformed(&self) -> bool {
        matches!(self, PinSyncError::MalformedPayload(_))
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            PinSyncError::Config(_) => "config",
            PinSyncError::Network(_) | PinSyncError::Http(_) => "network",
            PinSyncError::Server(_) => "server",
            PinSyncError::HttpStatus { .. } => "http_status",
            PinSyncError::MalformedPayload(_) | PinSyncError::Json(_) => "malformed",
            PinSyncError::RateLimited(_) => "rate_limited",
            PinSyncError::Io(_)
            | PinSyncError::Yaml(_)
            | PinSyncError::Other(_)
            | PinSyncError::Anyhow(_) => "other",
        }
    }
}

impl RetryableError for PinSyncError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            PinSyncError::Network(_) => RetryDecision::Retry,
            PinSyncError::HttpStatus { status, .. } => decision_for_status(*status),
            PinSyncError::RateLimited(secs) => {
                RetryDecision::RetryAfter(Duration::from_secs(*secs))
            }
            PinSyncError::Http(e) if e.is_connect() || e.is_timeout() => RetryDecision::Retry,
            PinSyncError::Http(e) => match e.status() {
                Some(status) => decision_for_status(status.as_u16()),
                None if e.is_decode() || e.is_builder() => RetryDecision::NoRetry,
                None => RetryDecision::Retry,
            },
            _ => RetryDecision::NoRetry,
        }
    }
}

fn decision_for_status(status: u16) -> RetryDecision {
    match status {
        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
        500..=599 => RetryDecision::Retry,
        _ => RetryDecision::NoRetry,
    }
}
