//! Persistent push stream listener
//!
//! Holds one long-lived stream to the server and turns each message into an
//! [`IncrementalEvent`] for the engine. The connection follows a small state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//!                                    any state --close()--> Closed
//! ```
//!
//! After an error or end of stream the listener waits for the
//! [`ReconnectPolicy`] delay and connects again.

use super::metrics;
use super::Inbound;
use crate::model::IncrementalEvent;
use crate::retry::ReconnectPolicy;
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Stream of raw push messages, one JSON document each
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Opens push streams
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Human-readable location, for logs
    fn endpoint(&self) -> String;

    /// Open a new stream
    async fn connect(&self) -> Result<MessageStream>;
}

/// Connection state of the push listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; only reached through `close()`
    Closed,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListenerState::Disconnected => "disconnected",
            ListenerState::Connecting => "connecting",
            ListenerState::Connected => "connected",
            ListenerState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Handle to a running push listener
#[derive(Debug)]
pub struct PushHandle {
    state_rx: watch::Receiver<ListenerState>,
    close_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Current connection state
    pub fn state(&self) -> ListenerState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every state transition
    pub fn state_receiver(&self) -> watch::Receiver<ListenerState> {
        self.state_rx.clone()
    }

    /// Close the stream for good
    ///
    /// Cancels any pending reconnect; no events are delivered afterwards.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    /// Close and wait for the listener task to exit
    pub async fn shutdown(self) {
        self.close();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Push listener task ended abnormally");
        }
    }
}

/// Why a connection ended, for reconnect metrics
#[derive(Debug, Clone, Copy)]
enum Disconnect {
    ConnectFailed,
    StreamError,
    StreamEnded,
}

impl Disconnect {
    fn label(self) -> &'static str {
        match self {
            Disconnect::ConnectFailed => "connect_failed",
            Disconnect::StreamError => "stream_error",
            Disconnect::StreamEnded => "stream_ended",
        }
    }
}

/// Outcome of one connection
enum Session {
    Ended(Disconnect),
    Closed,
    /// The engine dropped its receiver
    Abandoned,
}

/// Push stream listener
pub struct PushListener {
    transport: Arc<dyn PushTransport>,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<Inbound>,
    state_tx: watch::Sender<ListenerState>,
}

impl PushListener {
    /// Start listening on the current runtime
    pub fn spawn(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        tx: mpsc::Sender<Inbound>,
    ) -> PushHandle {
        let (state_tx, state_rx) = watch::channel(ListenerState::Disconnected);
        let (close_tx, close_rx) = watch::channel(false);

        let listener = Self {
            transport,
            policy,
            tx,
            state_tx,
        };
        let task = tokio::spawn(listener.run(close_rx));

        PushHandle {
            state_rx,
            close_tx,
            task,
        }
    }

    fn set_state(&self, state: ListenerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Push listener state change");
            metrics::set_push_connected(state == ListenerState::Connected);
        }
    }

    async fn run(self, mut close_rx: watch::Receiver<bool>) {
        let mut failures: u32 = 0;

        loop {
            let cause = match self.session(&mut close_rx).await {
                Session::Ended(cause) => cause,
                Session::Closed | Session::Abandoned => break,
            };
            if matches!(cause, Disconnect::StreamEnded | Disconnect::StreamError) {
                // The connection was up, so the failure budget starts over
                failures = 0;
            }
            self.set_state(ListenerState::Disconnected);

            let Some(delay) = self.policy.delay_for(failures) else {
                tracing::warn!(
                    endpoint = %self.transport.endpoint(),
                    attempts = failures,
                    "Push reconnect attempts exhausted, giving up"
                );
                return;
            };
            failures += 1;
            metrics::record_reconnect(cause.label());
            tracing::info!(
                cause = cause.label(),
                delay_ms = delay.as_millis() as u64,
                "Push stream disconnected, reconnecting"
            );

            tokio::select! {
                biased;
                _ = wait_closed(&mut close_rx) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ListenerState::Closed);
        tracing::info!(endpoint = %self.transport.endpoint(), "Push listener closed");
    }

    /// Connect and pump messages until the stream ends or the listener closes
    async fn session(&self, close_rx: &mut watch::Receiver<bool>) -> Session {
        if *close_rx.borrow() {
            return Session::Closed;
        }
        self.set_state(ListenerState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = wait_closed(close_rx) => return Session::Closed,
            result = self.transport.connect() => result,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, endpoint = %self.transport.endpoint(), "Push connect failed");
                return Session::Ended(Disconnect::ConnectFailed);
            }
        };

        self.set_state(ListenerState::Connected);
        tracing::info!(endpoint = %self.transport.endpoint(), "Push stream connected");

        loop {
            let item = tokio::select! {
                biased;
                _ = wait_closed(close_rx) => return Session::Closed,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(message)) => {
                    let Some(event) = parse_message(&message) else {
                        continue;
                    };
                    // A send blocked on a full channel must not outlive close()
                    let sent = tokio::select! {
                        biased;
                        _ = wait_closed(close_rx) => return Session::Closed,
                        sent = self.tx.send(Inbound::Event(event)) => sent,
                    };
                    if sent.is_err() {
                        return Session::Abandoned;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Push stream error");
                    return Session::Ended(Disconnect::StreamError);
                }
                None => {
                    tracing::info!("Push stream ended by server");
                    return Session::Ended(Disconnect::StreamEnded);
                }
            }
        }
    }
}

/// Parse one push message, logging and counting rejects
fn parse_message(message: &str) -> Option<IncrementalEvent> {
    match IncrementalEvent::parse(message) {
        Ok(event) => {
            tracing::debug!(kind = event.kind(), "Push event received");
            Some(event)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed push message");
            metrics::record_rejected("push");
            None
        }
    }
}

/// Resolves once close has been requested (or the handle is gone)
async fn wait_closed(close_rx: &mut watch::Receiver<bool>) {
    loop {
        if *close_rx.borrow_and_update() {
            return;
        }
        if close_rx.changed().await.is_err() {
            return;
        }
    }
}
