//! pinsync - live synchronization client for a shared pin map
//!
//! Keeps a local copy of a map server's pins and connections up to date over
//! two channels at once: periodic full-snapshot polling and a persistent push
//! stream of incremental events. Everything that arrives is reconciled into a
//! single store, turned into diffs for the presentation layer and summarized
//! in a bounded activity feed.
//!
//! # Architecture
//!
//! - **model**: Pins, connections, snapshots, push events and their wire format
//! - **store**: In-memory state keyed by entity ID
//! - **reconcile**: Snapshot diffing, idempotent event application, pending buffer
//! - **activity**: Human-readable, time-ordered activity feed
//! - **sync**: Poller, push listener and the engine loop that drives them
//! - **client**: HTTP transport (REST endpoints and the event stream)
//! - **config**: YAML configuration file
//!
//! # Example
//!
//! ```no_run
//! use pinsync::client::{ApiClient, StreamTransport};
//! use pinsync::config::SyncConfig;
//! use pinsync::sync::SyncEngine;
//! use std::sync::Arc;
//!
//! # async fn run() -> pinsync::Result<()> {
//! let config = SyncConfig::load_or_default(None)?;
//! let source = Arc::new(ApiClient::new(&config)?);
//! let transport = Arc::new(StreamTransport::new(&config)?);
//!
//! let mut engine = SyncEngine::new(config);
//! engine.run(source, transport).await?;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;

// Re-exports
pub use error::{PinSyncError, Result};
