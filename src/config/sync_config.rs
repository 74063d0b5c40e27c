//! pinsync configuration file handling
//!
//! Loads and manages the ~/.config/pinsync/config.yaml file.

use crate::retry::ReconnectPolicy;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default map server
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5002";

/// Default push stream path
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Maximum activity entries kept
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 50;

/// Maximum connections buffered while waiting for an endpoint pin
pub const DEFAULT_PENDING_CAPACITY: usize = 256;

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_stream_path() -> String {
    DEFAULT_STREAM_PATH.to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_activity_capacity() -> usize {
    DEFAULT_ACTIVITY_CAPACITY
}

fn default_pending_capacity() -> usize {
    DEFAULT_PENDING_CAPACITY
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

/// Sync engine configuration
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the map server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the push event stream, relative to `server_url`
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Enable full-snapshot polling
    #[serde(default = "default_true")]
    pub poll_enabled: bool,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Enable the push listener
    #[serde(default = "default_true")]
    pub push_enabled: bool,

    /// Push reconnect schedule
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Per-request timeout for REST calls, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Activity log size bound
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,

    /// Pending-connection buffer size bound
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,

    /// Lifecycle event broadcast capacity
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            stream_path: default_stream_path(),
            poll_enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            push_enabled: true,
            reconnect: ReconnectPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            activity_capacity: default_activity_capacity(),
            pending_capacity: default_pending_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl SyncConfig {
    /// Create a config pointing at the given server
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the activity log bound
    pub fn with_activity_capacity(mut self, capacity: usize) -> Self {
        self.activity_capacity = capacity;
        self
    }

    /// Set the pending-connection buffer bound
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join a path onto the server URL
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn stream_url(&self) -> String {
        self.endpoint(&self.stream_path)
    }

    /// Load configuration from the default path (~/.config/pinsync/config.yaml)
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::PinSyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading pinsync configuration");

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            server = %config.server_url,
            poll_interval_ms = config.poll_interval_ms,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from the given path if set, else from the default path, falling back
    /// to built-in defaults when no file exists
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    tracing::debug!("No config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save configuration to the default path
    pub fn save_default(&self) -> Result<()> {
        let path = Self::default_path();
        self.save(&path)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        tracing::info!(path = %path.display(), "Saving pinsync configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write config {}", path.display()))?;

        Ok(())
    }

    /// Get the default config path (~/.config/pinsync/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("pinsync");
        path.push("config.yaml");
        path
    }
}
