//! Human-readable activity feed
//!
//! Reconciliation diffs and server notices become [`ActivityEntry`]s in a
//! bounded [`ActivityLog`], most recent first.

mod entry;
mod log;

pub use entry::{ActivityEntry, ActivityKind, ActivityRecord};
pub use log::ActivityLog;
