//! Configuration validation
//!
//! Validates pinsync configuration for correctness:
//! - The server URL parses and is http(s)
//! - Intervals are non-zero
//! - Capacities are non-zero and bounded

use super::sync_config::SyncConfig;
use crate::PinSyncError;

/// Largest accepted activity log size
pub const MAX_ACTIVITY_CAPACITY: usize = 10_000;

/// Largest accepted pending-connection buffer
pub const MAX_PENDING_CAPACITY: usize = 100_000;

/// Largest accepted lifecycle event broadcast capacity
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a sync configuration
pub fn validate_config(config: &SyncConfig) -> ValidationResult {
    let mut errors = Vec::new();

    match reqwest::Url::parse(&config.server_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            "server_url",
            format!("Unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(
            "server_url",
            format!("Invalid URL '{}': {}", config.server_url, e),
        )),
    }

    if config.poll_enabled && config.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "poll_interval_ms",
            "Poll interval must be greater than 0",
        ));
    }

    if config.push_enabled && config.reconnect.delay_ms == 0 {
        errors.push(ValidationError::new(
            "reconnect.delay_ms",
            "Reconnect delay must be greater than 0",
        ));
    }

    if !config.reconnect.multiplier.is_finite() || config.reconnect.multiplier < 1.0 {
        errors.push(ValidationError::new(
            "reconnect.multiplier",
            "Multiplier must be a finite number >= 1.0",
        ));
    }

    for (field, value, max) in [
        ("activity_capacity", config.activity_capacity, MAX_ACTIVITY_CAPACITY),
        ("pending_capacity", config.pending_capacity, MAX_PENDING_CAPACITY),
        (
            "event_channel_capacity",
            config.event_channel_capacity,
            MAX_EVENT_CHANNEL_CAPACITY,
        ),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "Must be greater than 0"));
        } else if value > max {
            errors.push(ValidationError::new(
                field,
                format!("Must be at most {}, got {}", max, value),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and fold all problems into one [`PinSyncError::Config`]
pub fn validate_config_result(config: &SyncConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        PinSyncError::Config(joined)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SyncConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_url() {
        let config = SyncConfig::new("not a url");
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "server_url"));
    }

    #[test]
    fn test_non_http_scheme() {
        let config = SyncConfig::new("ftp://maps.test");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_values_collected() {
        let mut config = SyncConfig::default();
        config.poll_interval_ms = 0;
        config.activity_capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            validate_config_result(&config),
            Err(PinSyncError::Config(msg)) if msg.contains("poll_interval_ms")
        ));
    }

    #[test]
    fn test_oversized_capacities_rejected() {
        let mut config = SyncConfig::default();
        config.activity_capacity = usize::MAX;
        config.event_channel_capacity = usize::MAX / 2 + 1;
        config.pending_capacity = MAX_PENDING_CAPACITY;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["activity_capacity", "event_channel_capacity"]);
    }
}
