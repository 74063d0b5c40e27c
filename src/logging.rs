//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through RUST_LOG.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies (the CLI passes
/// `warn`, or `info` with `--verbose`).
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - lifecycle messages (connects, polls, resets)
/// - `RUST_LOG=pinsync::reconcile=debug` - every buffered or replayed connection
/// - `RUST_LOG=pinsync=trace,reqwest=debug` - everything, plus HTTP internals
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init_with_default(default_level: &str) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| crate::PinSyncError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize with the quiet CLI default ("warn")
pub fn init() -> crate::Result<()> {
    init_with_default("warn")
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init_with_default("debug");
}
