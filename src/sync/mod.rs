//! Live synchronization with the map server
//!
//! Two independent channels feed one engine:
//!
//! - the [`Poller`] fetches full snapshots on an interval
//! - the [`PushListener`] holds a persistent stream of incremental events
//!
//! Both forward [`Inbound`] items over an mpsc channel into the
//! [`SyncEngine`], whose single loop is the only place the store is mutated.

mod decoder;
mod engine;
pub mod metrics;
mod poller;
mod push;

pub use decoder::LineDecoder;
pub use engine::{NoopObserver, SyncCommand, SyncEngine, SyncEvent, SyncObserver, UpdateSource};
pub use poller::{ErrorCallback, Poller, PollerConfig, PollerHandle, SnapshotSource};
pub use push::{ListenerState, MessageStream, PushHandle, PushListener, PushTransport};

use crate::model::{IncrementalEvent, Snapshot};

/// An item delivered to the engine by one of the channels
#[derive(Debug, Clone)]
pub enum Inbound {
    Snapshot(Snapshot),
    Event(IncrementalEvent),
}
