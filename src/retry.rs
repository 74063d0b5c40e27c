//! Retry policies
//!
//! Two policies live here:
//! - [`RetryConfig`] + [`with_retry`]: bounded exponential backoff for one-shot
//!   REST writes.
//! - [`ReconnectPolicy`]: the push listener's reconnect schedule, fixed-delay and
//!   unbounded by default.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff for REST writes
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,

    /// Upper bound for any single delay, including server-requested ones
    pub max_delay: Duration,

    /// Stretch each delay by up to 25%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fail on the first error
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based), ignoring the budget
    pub fn delay(&self, retry: u32) -> Duration {
        let doubled = self.base_delay.saturating_mul(1u32 << retry.min(16));
        let delay = doubled.min(self.max_delay);
        if self.jitter {
            delay.mul_f64(1.0 + jitter_fraction() * 0.25)
        } else {
            delay
        }
    }

    /// How long to wait before retry number `retry`, or `None` to give up
    pub fn next_delay(&self, decision: RetryDecision, retry: u32) -> Option<Duration> {
        if retry >= self.retries {
            return None;
        }
        match decision {
            RetryDecision::NoRetry => None,
            RetryDecision::Retry => Some(self.delay(retry)),
            RetryDecision::RetryAfter(wait) => Some(wait.min(self.max_delay)),
        }
    }
}

/// A value in `[0, 1)` taken from a fresh v4 UUID
fn jitter_fraction() -> f64 {
    f64::from(uuid::Uuid::new_v4().as_bytes()[0]) / 256.0
}

/// How a failed write should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry, but not before the server-supplied wait
    RetryAfter(Duration),
    NoRetry,
}

/// Errors that know whether repeating the request can help
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Run `operation` until it succeeds, fails permanently or the budget runs out
///
/// The last error is returned unchanged.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut retry = 0;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(delay) = config.next_delay(error.retry_decision(), retry) else {
            debug!(operation = name, retries = retry, error = %error, "Giving up");
            return Err(error);
        };

        warn!(
            operation = name,
            retry = retry + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Request failed, retrying"
        );
        sleep(delay).await;
        retry += 1;
    }
}

/// Reconnect schedule for the push listener
///
/// `delay * multiplier^attempt`, capped at `max_delay`. With the default
/// multiplier of 1.0 this is a fixed delay. `max_attempts: None` retries forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Base delay in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound in milliseconds
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor per consecutive failure
    #[serde(default = "default_reconnect_multiplier")]
    pub multiplier: f64,

    /// Give up after this many consecutive failures
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_reconnect_multiplier() -> f64 {
    1.0
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: default_reconnect_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
            multiplier: default_reconnect_multiplier(),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unbounded attempts
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            max_attempts: None,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), or `None`
    /// once the attempt budget is spent
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let base = self.delay_ms as f64 * self.multiplier.max(1.0).powi(attempt as i32);
        let capped = base.min(self.max_delay_ms.max(self.delay_ms) as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PinSyncError;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let config = RetryConfig {
            retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(700),
            jitter: false,
        };
        assert_eq!(config.delay(0), Duration::from_millis(100));
        assert_eq!(config.delay(1), Duration::from_millis(200));
        assert_eq!(config.delay(2), Duration::from_millis(400));
        assert_eq!(config.delay(3), Duration::from_millis(700));
        assert_eq!(config.delay(40), Duration::from_millis(700));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(400),
            ..Default::default()
        };
        for _ in 0..20 {
            let delay = config.delay(0);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_next_delay_respects_budget_and_decision() {
        let config = RetryConfig {
            retries: 1,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.next_delay(RetryDecision::Retry, 0), Some(config.base_delay));
        assert_eq!(config.next_delay(RetryDecision::Retry, 1), None);
        assert_eq!(config.next_delay(RetryDecision::NoRetry, 0), None);
        assert_eq!(
            config.next_delay(RetryDecision::RetryAfter(Duration::from_secs(60)), 0),
            Some(config.max_delay)
        );
    }

    #[test]
    fn test_default_reconnect_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(100), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_reconnect_growth_and_budget() {
        let policy = ReconnectPolicy {
            delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_attempts: Some(5),
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(1_000)));
        assert_eq!(policy.delay_for(5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let config = RetryConfig::default();
        let mut calls = 0;

        let result = with_retry(&config, "create_pin", || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(PinSyncError::Network("reset by peer".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_returned_at_once() {
        let mut calls = 0;

        let result: crate::Result<()> = with_retry(&RetryConfig::default(), "delete_pin", || {
            calls += 1;
            async { Err(PinSyncError::Server("Pin not found".into())) }
        })
        .await;

        assert!(matches!(result, Err(PinSyncError::Server(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let config = RetryConfig {
            retries: 1,
            ..Default::default()
        };
        let mut calls = 0;

        let result: crate::Result<()> = with_retry(&config, "create_connection", || {
            calls += 1;
            let call = calls;
            async move {
                Err(PinSyncError::HttpStatus {
                    status: 502,
                    url: format!("attempt {}", call),
                })
            }
        })
        .await;

        match result {
            Err(PinSyncError::HttpStatus { url, .. }) => assert_eq!(url, "attempt 2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
