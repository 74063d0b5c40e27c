//! Periodic snapshot fetching
//!
//! Runs as its own tokio task. Each tick fetches a [`RawSnapshot`] through a
//! [`SnapshotSource`], skips it when identical to the last accepted payload,
//! and otherwise forwards the decoded [`Snapshot`] to the engine.
//!
//! At most one fetch is in flight: a tick that fires while the previous fetch
//! is still running is skipped.

use super::metrics;
use super::Inbound;
use crate::model::{RawSnapshot, Snapshot};
use crate::{PinSyncError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Where snapshots come from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human-readable location, for logs
    fn endpoint(&self) -> String;

    /// Fetch the current server state without decoding it
    async fn fetch_raw(&self) -> Result<RawSnapshot>;
}

/// Callback invoked for every failed poll
pub type ErrorCallback = Arc<dyn Fn(&PinSyncError) + Send + Sync>;

/// Shortest poll period; tokio intervals cannot tick at zero
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poller configuration
#[derive(Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub on_error: Option<ErrorCallback>,
}

impl PollerConfig {
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if shorter
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            on_error: None,
        }
    }

    pub fn with_on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PinSyncError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for PollerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerConfig")
            .field("interval", &self.interval)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Fetch now
    Poll,
    /// Forget the last payload, then fetch
    Refresh,
}

/// Handle to a running poller
#[derive(Debug)]
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    trigger_tx: mpsc::Sender<Trigger>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Request an immediate fetch
    ///
    /// Ignored if a fetch is already in flight.
    pub fn poll_now(&self) {
        let _ = self.trigger_tx.try_send(Trigger::Poll);
    }

    /// Forget the last accepted payload and fetch immediately
    pub fn refresh(&self) {
        let _ = self.trigger_tx.try_send(Trigger::Refresh);
    }

    /// Stop polling
    ///
    /// No further ticks fire. A fetch already in flight completes but its
    /// result is discarded.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop and wait for the polling task to exit
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Poller task ended abnormally");
        }
    }
}

/// Snapshot poller
pub struct Poller {
    source: Arc<dyn SnapshotSource>,
    config: PollerConfig,
    tx: mpsc::Sender<Inbound>,
    last_raw: Option<RawSnapshot>,
}

impl Poller {
    /// Start polling on the current runtime
    ///
    /// The first fetch happens immediately.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        config: PollerConfig,
        tx: mpsc::Sender<Inbound>,
    ) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(4);

        let poller = Self {
            source,
            config,
            tx,
            last_raw: None,
        };
        let task = tokio::spawn(poller.run(shutdown_rx, trigger_rx));

        PollerHandle {
            shutdown_tx,
            trigger_tx,
            task,
        }
    }

    async fn run(
        mut self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut trigger_rx: mpsc::Receiver<Trigger>,
    ) {
        tracing::info!(
            endpoint = %self.source.endpoint(),
            interval_ms = self.config.interval.as_millis() as u64,
            "Poller started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (done_tx, mut done_rx) = mpsc::channel::<Result<RawSnapshot>>(1);
        let mut in_flight = false;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(result) = done_rx.recv() => {
                    in_flight = false;
                    if !self.handle_result(result, &mut shutdown_rx).await {
                        break;
                    }
                }
                Some(trigger) = trigger_rx.recv() => {
                    if trigger == Trigger::Refresh {
                        self.last_raw = None;
                    }
                    self.start_fetch(&mut in_flight, &done_tx);
                }
                _ = interval.tick() => {
                    self.start_fetch(&mut in_flight, &done_tx);
                }
            }
        }

        tracing::info!(endpoint = %self.source.endpoint(), "Poller stopped");
    }

    fn start_fetch(&self, in_flight: &mut bool, done_tx: &mpsc::Sender<Result<RawSnapshot>>) {
        if *in_flight {
            tracing::debug!("Previous fetch still in flight, skipping tick");
            metrics::record_poll_skipped();
            return;
        }
        *in_flight = true;

        let source = Arc::clone(&self.source);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_raw().await;
            // Receiver is gone once the poller stopped; the result is discarded
            let _ = done_tx.send(result).await;
        });
    }

    /// Process one fetch result; returns `false` once the engine is gone
    async fn handle_result(
        &mut self,
        result: Result<RawSnapshot>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %self.source.endpoint(), "Poll failed");
                self.report(&e);
                return true;
            }
        };

        if self.last_raw.as_ref() == Some(&raw) {
            tracing::trace!("Snapshot unchanged");
            metrics::record_poll("unchanged");
            return true;
        }

        let snapshot: Snapshot = match raw.decode() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed snapshot");
                metrics::record_rejected("poll");
                self.report(&e);
                return true;
            }
        };

        self.last_raw = Some(raw);
        metrics::record_poll("changed");
        tracing::debug!(
            pins = snapshot.pins.len(),
            connections = snapshot.connections.len(),
            "Forwarding snapshot"
        );
        // stop() while blocked on a full channel discards the snapshot
        tokio::select! {
            biased;
            _ = wait_stopped(shutdown_rx) => false,
            sent = self.tx.send(Inbound::Snapshot(snapshot)) => sent.is_ok(),
        }
    }

    fn report(&self, error: &PinSyncError) {
        metrics::record_poll("error");
        if let Some(ref on_error) = self.config.on_error {
            on_error(error);
        }
    }
}

/// Resolves once stop has been requested (or the handle is gone)
async fn wait_stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PINS: &str = r#"{"status":"success","pins":[{"id":"p1","name":"Home","lat":1.0,"lng":2.0}]}"#;
    const CONNECTIONS: &str = r#"{"status":"success","connections":[]}"#;

    /// Source replaying a script of responses, repeating the last one
    struct ScriptedSource {
        responses: Mutex<Vec<Result<RawSnapshot>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<RawSnapshot>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        fn endpoint(&self) -> String {
            "scripted".to_string()
        }

        async fn fetch_raw(&self) -> Result<RawSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match responses.first() {
                    Some(Ok(raw)) => Ok(raw.clone()),
                    _ => Err(PinSyncError::Network("connection refused".to_string())),
                }
            }
        }
    }

    fn good() -> RawSnapshot {
        RawSnapshot::new(PINS, CONNECTIONS)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_is_immediate() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(good())]));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source, PollerConfig::new(Duration::from_secs(5)), tx);

        let inbound = tokio::time::timeout(Duration::from_millis(10), rx.recv())
            .await
            .expect("first fetch should not wait for the interval")
            .unwrap();
        match inbound {
            Inbound::Snapshot(snapshot) => assert_eq!(snapshot.pins.len(), 1),
            other => panic!("unexpected inbound item: {:?}", other),
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_a_send_blocked_on_a_full_channel() {
        let second = RawSnapshot::new(PINS.replace("Home", "Work"), CONNECTIONS);
        let source = Arc::new(ScriptedSource::new(vec![Ok(good()), Ok(second)]));
        let (tx, mut rx) = mpsc::channel(1);
        let handle = Poller::spawn(source, PollerConfig::new(Duration::from_secs(1)), tx);

        // The first snapshot fills the channel, the second waits behind it
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        match rx.recv().await {
            Some(Inbound::Snapshot(snapshot)) => assert_eq!(snapshot.pins[0].name, "Home"),
            other => panic!("unexpected inbound item: {:?}", other),
        }
        handle.shutdown().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let config = PollerConfig::new(Duration::ZERO);
        assert_eq!(config.interval, MIN_POLL_INTERVAL);

        let source = Arc::new(ScriptedSource::new(vec![Ok(good())]));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source, config, tx);
        assert!(matches!(rx.recv().await, Some(Inbound::Snapshot(_))));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_payload_is_not_forwarded() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(good())]));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source.clone(), PollerConfig::new(Duration::from_secs(5)), tx);

        assert!(rx.recv().await.is_some());
        tokio::time::sleep(Duration::from_secs(16)).await;

        assert!(source.calls.load(Ordering::SeqCst) >= 3);
        assert!(rx.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_reforwards_same_payload() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(good())]));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source, PollerConfig::new(Duration::from_secs(60)), tx);

        assert!(rx.recv().await.is_some());
        handle.refresh();
        let again = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(again, Ok(Some(Inbound::Snapshot(_)))));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_invoke_callback_and_keep_polling() {
        let source = Arc::new(ScriptedSource::new(vec![Err(PinSyncError::Network(
            "down".to_string(),
        ))]));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let config = PollerConfig::new(Duration::from_secs(5)).with_on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source, config, tx);

        // Ticks at 0s, 5s and 10s
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_snapshot_is_reported() {
        let bad = RawSnapshot::new("not json", CONNECTIONS);
        let source = Arc::new(ScriptedSource::new(vec![Ok(bad)]));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let config = PollerConfig::new(Duration::from_secs(5)).with_on_error(move |e| {
            assert!(e.is_malformed());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source, config, tx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert!(rx.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_skipped() {
        let source =
            Arc::new(ScriptedSource::new(vec![Ok(good())]).with_delay(Duration::from_secs(12)));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source.clone(), PollerConfig::new(Duration::from_secs(5)), tx);

        // Ticks at 5s and 10s fire while the first fetch is still running
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Ok(Inbound::Snapshot(_))));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let source =
            Arc::new(ScriptedSource::new(vec![Ok(good())]).with_delay(Duration::from_secs(2)));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = Poller::spawn(source.clone(), PollerConfig::new(Duration::from_secs(5)), tx);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        handle.stop();
        assert!(handle.is_stopped());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
        handle.shutdown().await;
    }
}
