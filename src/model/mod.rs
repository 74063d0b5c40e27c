//! Shared map data model
//!
//! - **Pin**: a named marker at a coordinate
//! - **Connection**: a link between two pins
//! - **Snapshot**: full point-in-time view fetched by polling
//! - **IncrementalEvent**: single-entity delta from the push stream

mod connection;
pub mod envelope;
mod event;
mod ids;
mod pin;
mod snapshot;
pub mod wire;

pub use connection::Connection;
pub use envelope::ResponseStatus;
pub use event::IncrementalEvent;
pub use ids::{ConnectionId, PinId};
pub use pin::Pin;
pub use snapshot::{RawSnapshot, Snapshot};
