//! HTTP transport for the map server
//!
//! [`ApiClient`] covers the REST endpoints and is the engine's
//! [`SnapshotSource`](crate::sync::SnapshotSource); [`StreamTransport`] is its
//! [`PushTransport`](crate::sync::PushTransport).

mod api;
mod stream;

pub use api::{ApiClient, NewPin};
pub use stream::StreamTransport;
