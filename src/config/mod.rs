//! Configuration system
//!
//! Loads ~/.config/pinsync/config.yaml with support for:
//! - Server URL and push stream path
//! - Poll interval and push reconnect policy
//! - Activity log and pending-connection bounds

mod sync_config;
pub mod validation;

pub use sync_config::{
    SyncConfig, DEFAULT_ACTIVITY_CAPACITY, DEFAULT_PENDING_CAPACITY, DEFAULT_SERVER_URL,
    DEFAULT_STREAM_PATH,
};
pub use validation::{
    validate_config, validate_config_result, ValidationError, MAX_ACTIVITY_CAPACITY,
    MAX_EVENT_CHANNEL_CAPACITY, MAX_PENDING_CAPACITY,
};
