//! Bounded, time-ordered activity feed

use super::entry::{ActivityEntry, ActivityRecord};
use chrono::{DateTime, Utc};

/// Most-recent-first list of activity entries
///
/// Invariants:
/// - never holds more than `capacity` entries
/// - timestamps are non-increasing from index 0
/// - at most one creation entry per pin ID and per connection ID
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record activity now
    ///
    /// Returns `true` if the log changed.
    pub fn record(&mut self, record: &ActivityRecord, is_historical: bool) -> bool {
        self.record_at(record, is_historical, Utc::now())
    }

    /// Record activity with an explicit "now"
    ///
    /// Historical records take the payload's own timestamp when it has one;
    /// everything else is stamped with `now`.
    pub fn record_at(
        &mut self,
        record: &ActivityRecord,
        is_historical: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if record.kind().is_creation() && self.entries.iter().any(|e| e.duplicates(record)) {
            tracing::trace!(kind = ?record.kind(), "Skipping duplicate activity");
            return false;
        }

        let timestamp = if is_historical {
            record.payload_timestamp().unwrap_or(now)
        } else {
            now
        };

        // Insert after any entries with the same timestamp
        let position = self
            .entries
            .iter()
            .position(|e| e.timestamp < timestamp)
            .unwrap_or(self.entries.len());
        if position >= self.capacity {
            return false;
        }

        self.entries
            .insert(position, ActivityEntry::from_record(record, timestamp));
        self.entries.truncate(self.capacity);
        true
    }

    /// Entries, most recent first
    pub fn entries(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
