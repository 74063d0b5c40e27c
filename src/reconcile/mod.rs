//! Reconciliation of remote data into the local store
//!
//! The [`Reconciler`] is the single writer of the [`StateStore`](crate::store::StateStore)
//! and the single source of [`Diff`]s. It accepts two kinds of input:
//!
//! 1. **Snapshots** from polling: authoritative for presence, diffed by ID
//! 2. **Incremental events** from the push stream: idempotent single-entity
//!    inserts, with connections buffered until both endpoint pins are known

mod diff;
mod pending;
mod reconciler;

pub use diff::Diff;
pub use pending::PendingConnections;
pub use reconciler::Reconciler;
