//! Prometheus metrics for the sync engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, CounterVec, Encoder, Gauge, TextEncoder,
};

lazy_static! {
    /// Counter: poll ticks by outcome (changed, unchanged, error)
    pub static ref POLLS: CounterVec = register_counter_vec!(
        "pinsync_polls_total",
        "Poll ticks by outcome",
        &["outcome"]
    )
    .expect("Failed to create polls metric");

    /// Counter: ticks skipped because a fetch was still in flight
    pub static ref POLLS_SKIPPED: CounterVec = register_counter_vec!(
        "pinsync_polls_skipped_total",
        "Poll ticks skipped while a fetch was in flight",
        &["reason"]
    )
    .expect("Failed to create polls_skipped metric");

    /// Counter: push reconnect attempts
    pub static ref PUSH_RECONNECTS: CounterVec = register_counter_vec!(
        "pinsync_push_reconnects_total",
        "Push stream reconnect attempts",
        &["cause"]
    )
    .expect("Failed to create push_reconnects metric");

    /// Gauge: push connection (1 = connected, 0 = not)
    pub static ref PUSH_CONNECTED: Gauge = register_gauge!(
        "pinsync_push_connected",
        "Push stream connection status (1 = connected, 0 = not)"
    )
    .expect("Failed to create push_connected metric");

    /// Counter: payloads rejected by channel
    pub static ref REJECTED_PAYLOADS: CounterVec = register_counter_vec!(
        "pinsync_rejected_payloads_total",
        "Malformed payloads discarded, by channel",
        &["channel"]
    )
    .expect("Failed to create rejected_payloads metric");

    /// Gauge: connections buffered waiting for an endpoint pin
    pub static ref PENDING_DEPTH: Gauge = register_gauge!(
        "pinsync_pending_connections",
        "Connections buffered until both endpoint pins are known"
    )
    .expect("Failed to create pending_connections metric");

    /// Counter: buffered connections discarded before they were applied
    pub static ref PENDING_DROPPED: CounterVec = register_counter_vec!(
        "pinsync_pending_dropped_total",
        "Buffered connections discarded without being applied",
        &["reason"]
    )
    .expect("Failed to create pending_dropped metric");

    /// Counter: changes applied to the store, by entity
    pub static ref APPLIED_CHANGES: CounterVec = register_counter_vec!(
        "pinsync_applied_changes_total",
        "Changes applied to the local store",
        &["entity", "change"]
    )
    .expect("Failed to create applied_changes metric");
}

pub fn record_poll(outcome: &str) {
    POLLS.with_label_values(&[outcome]).inc();
}

pub fn record_poll_skipped() {
    POLLS_SKIPPED.with_label_values(&["in_flight"]).inc();
}

pub fn record_reconnect(cause: &str) {
    PUSH_RECONNECTS.with_label_values(&[cause]).inc();
}

pub fn set_push_connected(connected: bool) {
    PUSH_CONNECTED.set(if connected { 1.0 } else { 0.0 });
}

pub fn record_rejected(channel: &str) {
    REJECTED_PAYLOADS.with_label_values(&[channel]).inc();
}

/// `reason` is `evicted` (buffer full) or `absent_from_snapshot`
pub fn record_pending_dropped(reason: &str) {
    PENDING_DROPPED.with_label_values(&[reason]).inc();
}

pub fn set_pending_depth(depth: usize) {
    PENDING_DEPTH.set(depth as f64);
}

/// Record every change in a diff
pub fn record_diff(diff: &crate::reconcile::Diff) {
    let counts = [
        ("pin", "added", diff.added_pins.len()),
        ("pin", "removed", diff.removed_pins.len()),
        ("pin", "updated", diff.updated_pins.len()),
        ("connection", "added", diff.added_connections.len()),
        ("connection", "removed", diff.removed_connections.len()),
    ];
    for (entity, change, count) in counts {
        if count > 0 {
            APPLIED_CHANGES
                .with_label_values(&[entity, change])
                .inc_by(count as f64);
        }
    }
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
