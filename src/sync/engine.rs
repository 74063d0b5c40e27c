//! Sync engine
//!
//! Owns the reconciler and the activity log, and runs the single event loop
//! that applies everything the poller and push listener deliver. Consumers
//! observe results through a [`SyncObserver`] (synchronous callbacks) and a
//! broadcast channel of lifecycle [`SyncEvent`]s.

use super::metrics;
use super::{Inbound, ListenerState, Poller, PollerConfig, PushListener, PushTransport, SnapshotSource};
use crate::activity::{ActivityEntry, ActivityLog, ActivityRecord};
use crate::config::{validate_config_result, SyncConfig, MAX_EVENT_CHANNEL_CAPACITY};
use crate::model::{Connection, IncrementalEvent, PinId, Snapshot};
use crate::reconcile::{Diff, PendingConnections, Reconciler};
use crate::store::StateStore;
use crate::{PinSyncError, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Capacity of the channel between the sync channels and the engine loop
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Receives reconciliation results
///
/// Callbacks run synchronously on the engine loop; keep them short.
pub trait SyncObserver: Send + Sync {
    /// Called after each reconciliation that changed the store
    fn on_diff(&self, _diff: &Diff) {}

    /// Called after each change to the activity log
    fn on_activity_changed(&self, _entries: &[ActivityEntry]) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Which channel produced an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Poll,
    Push,
}

/// Events emitted by the sync engine
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Engine loop started
    Started,

    /// Engine loop stopped
    Stopped,

    /// A reconciliation changed the store
    Reconciled {
        source: UpdateSource,
        changes: usize,
    },

    /// A poll failed; the store was left untouched
    PollError { message: String },

    /// Push listener changed state
    PushStateChanged(ListenerState),

    /// A payload was discarded as malformed
    PayloadRejected {
        source: UpdateSource,
        message: String,
    },

    /// Store and activity log were cleared
    Reset,
}

/// Commands that can be sent to a running engine
#[derive(Debug, Clone)]
pub enum SyncCommand {
    /// Fetch a snapshot immediately
    PollNow,

    /// Clear local state and resynchronize from a fresh snapshot
    Reset,

    /// Stop the poller, close the push stream and exit the loop
    Shutdown,
}

/// The sync engine
pub struct SyncEngine {
    config: SyncConfig,
    reconciler: Reconciler,
    activity: ActivityLog,
    observer: Arc<dyn SyncObserver>,

    /// Diffs until the first accepted snapshot describe history, not news
    first_snapshot_applied: bool,

    event_tx: broadcast::Sender<SyncEvent>,
    command_rx: Option<mpsc::Receiver<SyncCommand>>,
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncEngine {
    /// Create an engine with no observer
    pub fn new(config: SyncConfig) -> Self {
        let (event_tx, _) = broadcast::channel(
            config
                .event_channel_capacity
                .clamp(1, MAX_EVENT_CHANNEL_CAPACITY),
        );
        let (command_tx, command_rx) = mpsc::channel(16);

        Self {
            reconciler: Reconciler::new(config.pending_capacity),
            activity: ActivityLog::new(config.activity_capacity),
            observer: Arc::new(NoopObserver),
            first_snapshot_applied: false,
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
            config,
        }
    }

    /// Set the observer
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        self.reconciler.store()
    }

    pub fn pending(&self) -> &PendingConnections {
        self.reconciler.pending()
    }

    /// Activity entries, most recent first
    pub fn activity(&self) -> &[ActivityEntry] {
        self.activity.entries()
    }

    /// Get an event subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Get a command sender
    pub fn command_sender(&self) -> mpsc::Sender<SyncCommand> {
        self.command_tx.clone()
    }

    fn send_event(&self, event: SyncEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("Sync event sent but no receivers subscribed");
        }
    }

    /// Reconcile a full snapshot
    ///
    /// A rejected snapshot leaves the store and activity log untouched.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<Diff> {
        let diff = match self.reconciler.reconcile_snapshot(snapshot) {
            Ok(diff) => diff,
            Err(e) => {
                self.reject(UpdateSource::Poll, &e);
                return Err(e);
            }
        };

        let is_historical = !self.first_snapshot_applied;
        self.first_snapshot_applied = true;
        self.publish(&diff, UpdateSource::Poll, is_historical, None);
        Ok(diff)
    }

    /// Apply one push event
    pub fn apply_event(&mut self, event: &IncrementalEvent) -> Result<Diff> {
        let diff = match self.reconciler.apply_event(event) {
            Ok(diff) => diff,
            Err(e) => {
                self.reject(UpdateSource::Push, &e);
                return Err(e);
            }
        };

        let notice = match event {
            IncrementalEvent::ActivityUpdate { message } if !message.trim().is_empty() => {
                Some(ActivityRecord::Notice(message.clone()))
            }
            _ => None,
        };
        self.publish(&diff, UpdateSource::Push, false, notice);
        Ok(diff)
    }

    /// Clear the store, the pending buffer and the activity log
    ///
    /// Observers receive a diff removing everything that was stored. The next
    /// snapshot is treated as history again.
    pub fn reset(&mut self) {
        let store = self.reconciler.store();
        let diff = Diff {
            removed_pins: store.pins().cloned().collect(),
            removed_connections: store.connections().cloned().collect(),
            ..Default::default()
        };

        self.reconciler.reset();
        self.activity.clear();
        self.first_snapshot_applied = false;
        metrics::set_pending_depth(0);
        tracing::info!(removed = diff.change_count(), "Sync state reset");

        if !diff.is_empty() {
            self.observer.on_diff(&diff);
        }
        self.observer.on_activity_changed(self.activity.entries());
        self.send_event(SyncEvent::Reset);
    }

    fn reject(&self, source: UpdateSource, error: &PinSyncError) {
        let channel = match source {
            UpdateSource::Poll => "poll",
            UpdateSource::Push => "push",
        };
        tracing::warn!(channel, error = %error, "Rejected payload, store unchanged");
        metrics::record_rejected(channel);
        self.send_event(SyncEvent::PayloadRejected {
            source,
            message: error.to_string(),
        });
    }

    /// Record activity for a diff and notify observers
    fn publish(
        &mut self,
        diff: &Diff,
        source: UpdateSource,
        is_historical: bool,
        notice: Option<ActivityRecord>,
    ) {
        metrics::set_pending_depth(self.reconciler.pending().len());

        let mut activity_changed = false;
        for record in self.activity_records(diff).into_iter().chain(notice) {
            activity_changed |= self.activity.record(&record, is_historical);
        }

        if !diff.is_empty() {
            metrics::record_diff(diff);
            tracing::debug!(
                ?source,
                added_pins = diff.added_pins.len(),
                removed_pins = diff.removed_pins.len(),
                updated_pins = diff.updated_pins.len(),
                added_connections = diff.added_connections.len(),
                removed_connections = diff.removed_connections.len(),
                "Applied diff"
            );
            self.observer.on_diff(diff);
            self.send_event(SyncEvent::Reconciled {
                source,
                changes: diff.change_count(),
            });
        }
        if activity_changed {
            self.observer.on_activity_changed(self.activity.entries());
        }
    }

    /// Translate a diff into activity records
    ///
    /// Pin names come from the store, falling back to pins removed in the same
    /// diff. A connection replaced in place is reported once, as a creation.
    fn activity_records(&self, diff: &Diff) -> Vec<ActivityRecord> {
        let store = self.reconciler.store();
        let name_of = |id: &PinId| -> Option<String> {
            store
                .pin_name(id)
                .or_else(|| {
                    diff.removed_pins
                        .iter()
                        .find(|p| &p.id == id)
                        .map(|p| p.name.as_str())
                })
                .map(str::to_string)
        };
        let names = |connection: &Connection| {
            (
                name_of(&connection.source_id),
                name_of(&connection.target_id),
            )
        };

        let mut records = Vec::with_capacity(diff.change_count());
        records.extend(diff.removed_pins.iter().cloned().map(ActivityRecord::PinDeleted));
        for connection in &diff.removed_connections {
            if diff.added_connections.iter().any(|c| c.id == connection.id) {
                continue;
            }
            let (source_name, target_name) = names(connection);
            records.push(ActivityRecord::ConnectionDeleted {
                connection: connection.clone(),
                source_name,
                target_name,
            });
        }
        records.extend(diff.added_pins.iter().cloned().map(ActivityRecord::PinCreated));
        for connection in &diff.added_connections {
            let (source_name, target_name) = names(connection);
            records.push(ActivityRecord::ConnectionCreated {
                connection: connection.clone(),
                source_name,
                target_name,
            });
        }
        records
    }

    fn handle_inbound(&mut self, item: Inbound) {
        // Errors were already reported through reject()
        let _ = match item {
            Inbound::Snapshot(snapshot) => self.apply_snapshot(&snapshot),
            Inbound::Event(event) => self.apply_event(&event),
        };
    }

    /// Run the engine loop until a `Shutdown` command arrives
    ///
    /// Spawns the poller and the push listener (each only if enabled in the
    /// config) and applies whatever they deliver, one item at a time. Fails
    /// up front with [`PinSyncError::Config`] if the config does not validate.
    pub async fn run(
        &mut self,
        source: Arc<dyn SnapshotSource>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<()> {
        validate_config_result(&self.config)?;

        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| PinSyncError::Config("Sync engine already running".to_string()))?;

        let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let poller = if self.config.poll_enabled {
            let event_tx = self.event_tx.clone();
            let config = PollerConfig::new(self.config.poll_interval()).with_on_error(move |e| {
                let _ = event_tx.send(SyncEvent::PollError {
                    message: e.to_string(),
                });
            });
            Some(Poller::spawn(source, config, inbound_tx.clone()))
        } else {
            None
        };

        let push = if self.config.push_enabled {
            Some(PushListener::spawn(
                transport,
                self.config.reconnect.clone(),
                inbound_tx.clone(),
            ))
        } else {
            None
        };
        drop(inbound_tx);

        let mut push_state = push.as_ref().map(|p| p.state_receiver());

        tracing::info!(
            server = %self.config.server_url,
            poll = self.config.poll_enabled,
            push = self.config.push_enabled,
            "Sync engine started"
        );
        self.send_event(SyncEvent::Started);

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    match cmd {
                        SyncCommand::PollNow => {
                            if let Some(ref poller) = poller {
                                poller.poll_now();
                            }
                        }
                        SyncCommand::Reset => {
                            self.reset();
                            if let Some(ref poller) = poller {
                                poller.refresh();
                            }
                        }
                        SyncCommand::Shutdown => {
                            tracing::info!("Received shutdown command");
                            break;
                        }
                    }
                }
                Some(item) = inbound_rx.recv() => {
                    self.handle_inbound(item);
                }
                state = next_state(&mut push_state) => {
                    self.send_event(SyncEvent::PushStateChanged(state));
                }
            }
        }

        if let Some(poller) = poller {
            poller.shutdown().await;
        }
        if let Some(push) = push {
            push.shutdown().await;
        }

        // Restore the command channel so the engine can be run again
        let (command_tx, command_rx) = mpsc::channel(16);
        self.command_tx = command_tx;
        self.command_rx = Some(command_rx);

        tracing::info!("Sync engine stopped");
        self.send_event(SyncEvent::Stopped);
        Ok(())
    }
}

/// Resolves with the next push listener state; never resolves once the
/// listener is gone
async fn next_state(slot: &mut Option<watch::Receiver<ListenerState>>) -> ListenerState {
    if let Some(rx) = slot {
        if rx.changed().await.is_ok() {
            return *rx.borrow_and_update();
        }
    }
    *slot = None;
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::model::Pin;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        diffs: Mutex<Vec<Diff>>,
        activity_calls: Mutex<usize>,
    }

    impl SyncObserver for Recorder {
        fn on_diff(&self, diff: &Diff) {
            self.diffs.lock().unwrap().push(diff.clone());
        }

        fn on_activity_changed(&self, _entries: &[ActivityEntry]) {
            *self.activity_calls.lock().unwrap() += 1;
        }
    }

    fn engine() -> (SyncEngine, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = SyncEngine::new(SyncConfig::default()).with_observer(recorder.clone());
        (engine, recorder)
    }

    fn pin(id: &str, name: &str) -> Pin {
        Pin::new(id, name, 10.0, 20.0)
    }

    #[test]
    fn test_first_snapshot_is_historical() {
        let (mut engine, recorder) = engine();
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let snapshot = Snapshot::new(vec![pin("p1", "Home").with_created_at(created)], vec![]);

        let diff = engine.apply_snapshot(&snapshot).unwrap();
        assert_eq!(diff.added_pins.len(), 1);
        assert_eq!(engine.activity().len(), 1);
        assert_eq!(engine.activity()[0].timestamp, created);
        assert_eq!(recorder.diffs.lock().unwrap().len(), 1);
        assert_eq!(*recorder.activity_calls.lock().unwrap(), 1);

        // Later additions are live
        let later = Snapshot::new(
            vec![
                pin("p1", "Home").with_created_at(created),
                pin("p2", "Work").with_created_at(created),
            ],
            vec![],
        );
        engine.apply_snapshot(&later).unwrap();
        let newest = &engine.activity()[0];
        assert_eq!(newest.message, "📍 Created pin \"Work\"");
        assert!(newest.timestamp > created);
    }

    #[test]
    fn test_unchanged_snapshot_notifies_nobody() {
        let (mut engine, recorder) = engine();
        let snapshot = Snapshot::new(vec![pin("p1", "Home")], vec![]);
        engine.apply_snapshot(&snapshot).unwrap();
        let diff = engine.apply_snapshot(&snapshot).unwrap();

        assert!(diff.is_empty());
        assert_eq!(recorder.diffs.lock().unwrap().len(), 1);
        assert_eq!(*recorder.activity_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_connection_activity_uses_pin_names() {
        let (mut engine, _) = engine();
        engine
            .apply_event(&IncrementalEvent::from(pin("p1", "Home")))
            .unwrap();
        engine
            .apply_event(&IncrementalEvent::from(pin("p2", "Work")))
            .unwrap();
        engine
            .apply_event(&IncrementalEvent::from(Connection::new("c1", "p1", "p2")))
            .unwrap();

        let messages: Vec<_> = engine.activity().iter().map(|e| e.message.clone()).collect();
        assert!(messages.contains(&"Home ❤️ Work".to_string()));
    }

    #[test]
    fn test_cascade_activity_names_removed_pins() {
        let (mut engine, _) = engine();
        let snapshot = Snapshot::new(
            vec![pin("p1", "Home"), pin("p2", "Work")],
            vec![Connection::new("c1", "p1", "p2")],
        );
        engine.apply_snapshot(&snapshot).unwrap();

        let after = Snapshot::new(vec![pin("p2", "Work")], vec![]);
        let diff = engine.apply_snapshot(&after).unwrap();
        assert_eq!(diff.removed_connections.len(), 1);

        let messages: Vec<_> = engine.activity().iter().map(|e| e.message.clone()).collect();
        assert!(messages.contains(&"Home 💔 Work".to_string()));
        assert!(messages.contains(&"🗑️ Deleted pin \"Home\"".to_string()));
    }

    #[test]
    fn test_notice_is_recorded_without_diff() {
        let (mut engine, recorder) = engine();
        let diff = engine
            .apply_event(&IncrementalEvent::ActivityUpdate {
                message: "Server restarted".to_string(),
            })
            .unwrap();

        assert!(diff.is_empty());
        assert!(recorder.diffs.lock().unwrap().is_empty());
        assert_eq!(engine.activity()[0].kind, ActivityKind::Notice);
        assert_eq!(engine.activity()[0].message, "Server restarted");
    }

    #[test]
    fn test_rejected_payload_changes_nothing() {
        let (mut engine, recorder) = engine();
        let mut events = engine.subscribe();

        let bad = Snapshot::new(vec![Pin::new("p1", "Home", 95.0, 0.0)], vec![]);
        assert!(engine.apply_snapshot(&bad).is_err());
        assert!(engine.store().is_empty());
        assert!(engine.activity().is_empty());
        assert!(recorder.diffs.lock().unwrap().is_empty());
        assert!(matches!(
            events.try_recv(),
            Ok(SyncEvent::PayloadRejected {
                source: UpdateSource::Poll,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut engine, recorder) = engine();
        let snapshot = Snapshot::new(
            vec![pin("p1", "Home"), pin("p2", "Work")],
            vec![Connection::new("c1", "p1", "p2")],
        );
        engine.apply_snapshot(&snapshot).unwrap();
        engine.reset();

        assert!(engine.store().is_empty());
        assert!(engine.activity().is_empty());
        let diffs = recorder.diffs.lock().unwrap();
        let last = diffs.last().unwrap();
        assert_eq!(last.removed_pins.len(), 2);
        assert_eq!(last.removed_connections.len(), 1);
    }
}
