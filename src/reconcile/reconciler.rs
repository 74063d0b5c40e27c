//! Merging snapshots and push events into the store

use super::{Diff, PendingConnections};
use crate::model::{Connection, ConnectionId, IncrementalEvent, Pin, PinId, Snapshot};
use crate::store::StateStore;
use crate::sync::metrics;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Last-write-wins: the incoming version replaces the stored one unless it is
/// strictly older. An unknown timestamp sorts before every known one.
fn supersedes(incoming: Option<DateTime<Utc>>, existing: Option<DateTime<Utc>>) -> bool {
    incoming >= existing
}

/// Single writer of the [`StateStore`]
///
/// Both entry points validate first and compute the complete diff before the
/// first mutation, so a rejected payload leaves the store untouched.
#[derive(Debug)]
pub struct Reconciler {
    store: StateStore,
    pending: PendingConnections,
}

impl Reconciler {
    pub fn new(pending_capacity: usize) -> Self {
        Self {
            store: StateStore::new(),
            pending: PendingConnections::new(pending_capacity),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Connections waiting for an endpoint pin
    pub fn pending(&self) -> &PendingConnections {
        &self.pending
    }

    /// Clear the store and the pending buffer
    pub fn reset(&mut self) {
        self.store.clear();
        self.pending.clear();
    }

    /// Merge a full snapshot
    ///
    /// The snapshot is authoritative for presence: local entities it does not
    /// list are removed, and remote connections whose endpoints it does not list
    /// are buffered instead of stored. Applying the same snapshot twice yields an
    /// empty diff the second time.
    pub fn reconcile_snapshot(&mut self, remote: &Snapshot) -> Result<Diff> {
        remote.validate()?;

        let mut diff = Diff::default();
        let remote_pin_ids: HashSet<&PinId> = remote.pins.iter().map(|p| &p.id).collect();
        let remote_connection_ids: HashSet<&ConnectionId> =
            remote.connections.iter().map(|c| &c.id).collect();

        for pin in &remote.pins {
            match self.store.get_pin(&pin.id) {
                None => diff.added_pins.push(pin.clone()),
                Some(local) if local != pin => {
                    if supersedes(pin.created_at, local.created_at) {
                        diff.updated_pins.push(pin.clone());
                    } else {
                        tracing::debug!(pin = %pin.id, "Keeping newer local pin over snapshot");
                    }
                }
                Some(_) => {}
            }
        }
        diff.removed_pins = self
            .store
            .pins()
            .filter(|p| !remote_pin_ids.contains(&p.id))
            .cloned()
            .collect();

        // Endpoints are checked against the pin set the store holds once this
        // diff lands, which is exactly the remote pin set.
        let resolvable = |c: &Connection| {
            remote_pin_ids.contains(&c.source_id) && remote_pin_ids.contains(&c.target_id)
        };

        let mut stored_ids: HashSet<&ConnectionId> = HashSet::new();
        let mut unresolved = Vec::new();
        for connection in &remote.connections {
            if !resolvable(connection) {
                unresolved.push(connection.clone());
                continue;
            }
            stored_ids.insert(&connection.id);
            match self.store.get_connection(&connection.id) {
                None => diff.added_connections.push(connection.clone()),
                Some(local) if local == connection => {}
                Some(local) => {
                    if supersedes(connection.created_at, local.created_at) || !resolvable(local) {
                        diff.removed_connections.push(local.clone());
                        diff.added_connections.push(connection.clone());
                    }
                }
            }
        }
        diff.removed_connections.extend(
            self.store
                .connections()
                .filter(|c| !stored_ids.contains(&c.id))
                .cloned(),
        );

        let mut next_pending: Vec<Connection> = Vec::new();
        for buffered in self.pending.iter() {
            if remote_connection_ids.contains(&buffered.id) {
                continue;
            }
            if resolvable(buffered) {
                // Both endpoints exist server-side, yet the server no longer
                // lists the connection: it was deleted after being pushed
                tracing::warn!(
                    connection = %buffered.id,
                    source = %buffered.source_id,
                    target = %buffered.target_id,
                    "Dropping buffered connection not listed by resolving snapshot"
                );
                metrics::record_pending_dropped("absent_from_snapshot");
            } else {
                next_pending.push(buffered.clone());
            }
        }
        next_pending.extend(unresolved);

        for connection in &diff.removed_connections {
            self.store.remove_connection(&connection.id);
        }
        for pin in &diff.removed_pins {
            self.store.remove_pin(&pin.id);
        }
        for pin in diff.added_pins.iter().chain(&diff.updated_pins) {
            self.store.insert_pin(pin.clone());
        }
        for connection in &diff.added_connections {
            self.store.insert_connection(connection.clone());
        }
        self.pending.replace(next_pending);

        if !diff.is_empty() {
            tracing::debug!(
                added_pins = diff.added_pins.len(),
                removed_pins = diff.removed_pins.len(),
                updated_pins = diff.updated_pins.len(),
                added_connections = diff.added_connections.len(),
                removed_connections = diff.removed_connections.len(),
                pending = self.pending.len(),
                "Snapshot reconciled"
            );
        }

        Ok(diff)
    }

    /// Merge one push event
    ///
    /// Re-delivery of a known entity is a no-op. A connection whose endpoints are
    /// not both known is buffered and produces no diff; it is applied by the
    /// event that introduces its last missing pin.
    pub fn apply_event(&mut self, event: &IncrementalEvent) -> Result<Diff> {
        event.validate()?;

        let mut diff = Diff::default();
        match event {
            IncrementalEvent::PinAdded { pin } => {
                self.apply_pin(pin, &mut diff);
                self.replay_pending(&mut diff);
            }
            IncrementalEvent::ConnectionAdded { connection } => {
                self.apply_connection(connection, &mut diff);
            }
            IncrementalEvent::ActivityUpdate { .. } => {}
        }
        Ok(diff)
    }

    fn apply_pin(&mut self, pin: &Pin, diff: &mut Diff) {
        match self.store.get_pin(&pin.id) {
            None => {
                self.store.insert_pin(pin.clone());
                diff.added_pins.push(pin.clone());
            }
            Some(local) if local == pin => {
                tracing::trace!(pin = %pin.id, "Duplicate pin_added ignored");
            }
            Some(local) => {
                if supersedes(pin.created_at, local.created_at) {
                    self.store.insert_pin(pin.clone());
                    diff.updated_pins.push(pin.clone());
                } else {
                    tracing::debug!(pin = %pin.id, "Stale pin_added ignored");
                }
            }
        }
    }

    fn apply_connection(&mut self, connection: &Connection, diff: &mut Diff) {
        let endpoints_known = self.endpoints_known(connection);
        let existing = self.store.get_connection(&connection.id).cloned();

        match existing {
            Some(local) if &local == connection => {
                tracing::trace!(connection = %connection.id, "Duplicate connection_added ignored");
            }
            Some(local) => {
                if endpoints_known && supersedes(connection.created_at, local.created_at) {
                    self.store.insert_connection(connection.clone());
                    diff.removed_connections.push(local);
                    diff.added_connections.push(connection.clone());
                } else {
                    tracing::debug!(connection = %connection.id, "Stale connection_added ignored");
                }
            }
            None if endpoints_known => {
                self.store.insert_connection(connection.clone());
                diff.added_connections.push(connection.clone());
            }
            None => {
                tracing::debug!(
                    connection = %connection.id,
                    source = %connection.source_id,
                    target = %connection.target_id,
                    "Buffering connection until both endpoints are known"
                );
                self.pending.insert(connection.clone());
            }
        }
    }

    /// Apply buffered connections whose endpoints are now both known
    fn replay_pending(&mut self, diff: &mut Diff) {
        let store = &self.store;
        let resolved = self.pending.take_resolvable(|id| store.contains_pin(id));
        for connection in resolved {
            if self.store.contains_connection(&connection.id) {
                continue;
            }
            tracing::debug!(connection = %connection.id, "Replaying buffered connection");
            self.store.insert_connection(connection.clone());
            diff.added_connections.push(connection);
        }
    }

    fn endpoints_known(&self, connection: &Connection) -> bool {
        self.store.contains_pin(&connection.source_id)
            && self.store.contains_pin(&connection.target_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinSyncError;
    use chrono::TimeZone;

    fn pin(id: &str) -> Pin {
        Pin::new(id, format!("Pin {}", id), 10.0, 20.0)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_snapshot_add_update_remove() {
        let mut reconciler = Reconciler::new(16);
        reconciler
            .reconcile_snapshot(&Snapshot::new(vec![pin("p1"), pin("p2")], vec![]))
            .unwrap();

        let mut renamed = pin("p2");
        renamed.name = "Renamed".to_string();
        let diff = reconciler
            .reconcile_snapshot(&Snapshot::new(vec![renamed.clone(), pin("p3")], vec![]))
            .unwrap();

        assert_eq!(diff.added_pin_ids(), vec![&PinId::new("p3")]);
        assert_eq!(diff.removed_pin_ids(), vec![&PinId::new("p1")]);
        assert_eq!(diff.updated_pins, vec![renamed]);
        assert_eq!(reconciler.store().pin_count(), 2);
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut reconciler = Reconciler::new(16);
        let snapshot = Snapshot::new(
            vec![pin("p1"), pin("p2")],
            vec![
                Connection::new("c1", "p1", "p2"),
                Connection::new("c2", "p1", "ghost"),
            ],
        );

        let first = reconciler.reconcile_snapshot(&snapshot).unwrap();
        assert_eq!(first.change_count(), 3);
        assert_eq!(reconciler.pending().len(), 1);

        let second = reconciler.reconcile_snapshot(&snapshot).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_leaves_store_unchanged() {
        let mut reconciler = Reconciler::new(16);
        reconciler
            .reconcile_snapshot(&Snapshot::new(vec![pin("p1")], vec![]))
            .unwrap();
        let before = reconciler.store().snapshot();

        let bad = Snapshot::new(vec![pin("p2"), Pin::new("p3", "X", 200.0, 0.0)], vec![]);
        let err = reconciler.reconcile_snapshot(&bad).unwrap_err();

        assert!(matches!(err, PinSyncError::MalformedPayload(_)));
        assert_eq!(reconciler.store().snapshot(), before);
    }

    #[test]
    fn test_pin_added_twice_is_noop() {
        let mut reconciler = Reconciler::new(16);
        let event = IncrementalEvent::from(pin("p1"));

        assert_eq!(reconciler.apply_event(&event).unwrap().added_pins.len(), 1);
        assert!(reconciler.apply_event(&event).unwrap().is_empty());
    }

    #[test]
    fn test_connection_buffered_then_replayed() {
        let mut reconciler = Reconciler::new(16);
        reconciler.apply_event(&pin("p1").into()).unwrap();
        let before = reconciler.store().snapshot();

        let diff = reconciler
            .apply_event(&Connection::new("c1", "p1", "p2").into())
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(reconciler.store().snapshot(), before);
        assert_eq!(reconciler.pending().len(), 1);

        let diff = reconciler.apply_event(&pin("p2").into()).unwrap();
        assert_eq!(diff.added_pin_ids(), vec![&PinId::new("p2")]);
        assert_eq!(diff.added_connection_ids(), vec![&ConnectionId::new("c1")]);
        assert!(reconciler.pending().is_empty());
    }

    #[test]
    fn test_buffered_connection_absent_from_resolving_snapshot_is_dropped() {
        let mut reconciler = Reconciler::new(16);
        reconciler
            .reconcile_snapshot(&Snapshot::new(vec![pin("p1")], vec![]))
            .unwrap();
        reconciler
            .apply_event(&IncrementalEvent::from(Connection::new("c1", "p1", "p2")))
            .unwrap();
        // Still waiting on p2: kept across a snapshot that does not resolve it
        reconciler
            .reconcile_snapshot(&Snapshot::new(vec![pin("p1")], vec![]))
            .unwrap();
        assert!(reconciler.pending().contains(&ConnectionId::new("c1")));

        let dropped = metrics::PENDING_DROPPED
            .with_label_values(&["absent_from_snapshot"])
            .get();
        let resolving = Snapshot::new(vec![pin("p1"), pin("p2")], vec![]);
        let diff = reconciler.reconcile_snapshot(&resolving).unwrap();

        assert_eq!(diff.added_pins.len(), 1);
        assert!(diff.added_connections.is_empty());
        assert!(reconciler.pending().is_empty());
        assert_eq!(reconciler.store().connection_count(), 0);
        assert!(
            metrics::PENDING_DROPPED
                .with_label_values(&["absent_from_snapshot"])
                .get()
                >= dropped + 1.0
        );
        // The same snapshot again is a no-op
        assert!(reconciler.reconcile_snapshot(&resolving).unwrap().is_empty());
    }

    #[test]
    fn test_cascade_removal_from_snapshot() {
        let mut reconciler = Reconciler::new(16);
        reconciler
            .reconcile_snapshot(&Snapshot::new(
                vec![pin("p1"), pin("p2"), pin("p3")],
                vec![
                    Connection::new("c1", "p1", "p2"),
                    Connection::new("c2", "p3", "p1"),
                ],
            ))
            .unwrap();

        let diff = reconciler
            .reconcile_snapshot(&Snapshot::new(vec![pin("p2"), pin("p3")], vec![]))
            .unwrap();

        assert_eq!(diff.removed_pin_ids(), vec![&PinId::new("p1")]);
        let mut removed: Vec<_> = diff
            .removed_connection_ids()
            .into_iter()
            .map(|id| id.as_str())
            .collect();
        removed.sort_unstable();
        assert_eq!(removed, vec!["c1", "c2"]);
        assert_eq!(reconciler.store().connection_count(), 0);
    }

    #[test]
    fn test_dangling_connection_in_snapshot_is_buffered_and_removed() {
        let mut reconciler = Reconciler::new(16);
        reconciler
            .reconcile_snapshot(&Snapshot::new(
                vec![pin("p1"), pin("p2")],
                vec![Connection::new("c1", "p1", "p2")],
            ))
            .unwrap();

        // Server deleted p2 but still lists c1
        let diff = reconciler
            .reconcile_snapshot(&Snapshot::new(
                vec![pin("p1")],
                vec![Connection::new("c1", "p1", "p2")],
            ))
            .unwrap();

        assert_eq!(diff.removed_connection_ids(), vec![&ConnectionId::new("c1")]);
        assert!(reconciler.pending().contains(&ConnectionId::new("c1")));
    }

    #[test]
    fn test_last_write_wins() {
        let mut reconciler = Reconciler::new(16);
        let newer = pin("p1").with_created_at(at(10));
        let mut older = pin("p1").with_created_at(at(5));
        older.name = "Old".to_string();

        reconciler.apply_event(&newer.clone().into()).unwrap();
        assert!(reconciler.apply_event(&older.clone().into()).unwrap().is_empty());
        assert!(reconciler
            .reconcile_snapshot(&Snapshot::new(vec![older], vec![]))
            .unwrap()
            .is_empty());
        assert_eq!(reconciler.store().get_pin(&PinId::new("p1")), Some(&newer));

        let mut newest = pin("p1").with_created_at(at(20));
        newest.name = "Newest".to_string();
        let diff = reconciler.apply_event(&newest.clone().into()).unwrap();
        assert_eq!(diff.updated_pins, vec![newest]);
    }

    #[test]
    fn test_activity_update_changes_nothing() {
        let mut reconciler = Reconciler::new(16);
        let diff = reconciler
            .apply_event(&IncrementalEvent::ActivityUpdate {
                message: "hello".to_string(),
            })
            .unwrap();
        assert!(diff.is_empty());
        assert!(reconciler.store().is_empty());
    }

    #[test]
    fn test_reset() {
        let mut reconciler = Reconciler::new(16);
        reconciler.apply_event(&pin("p1").into()).unwrap();
        reconciler
            .apply_event(&Connection::new("c1", "p1", "p9").into())
            .unwrap();
        reconciler.reset();
        assert!(reconciler.store().is_empty());
        assert!(reconciler.pending().is_empty());
    }
}
