//! Retry utilities for remote mutations with exponential backoff.
//!
//! Retries happen on:
//! - 5xx server errors
//! - no connection (connect failures, timeouts)
//!
//! Everything else fails immediately. Each delay grows by `factor`, is capped
//! at `max_delay`, and gets up to `jitter` extra on top. Once the current
//! delay reaches the cap the chain gives up.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::remote::RemoteError;

/// Default retry configuration
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 2;
pub const DEFAULT_FACTOR: f64 = 1.5;
pub const DEFAULT_JITTER: f64 = 0.05;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 120;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied after each retry
    pub factor: f64,
    /// Maximum random extra, as a fraction of the delay
    pub jitter: f64,
    /// Cap on the delay; reaching it ends the chain
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY_SECS, DEFAULT_FACTOR, DEFAULT_JITTER, DEFAULT_MAX_DELAY_SECS)
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings
    pub fn new(initial_delay_secs: u64, factor: f64, jitter: f64, max_delay_secs: u64) -> Self {
        Self {
            initial_delay: Duration::from_secs(initial_delay_secs),
            factor,
            jitter,
            max_delay: Duration::from_secs(max_delay_secs),
        }
    }

    /// Delay following `current`, with a random jitter sample.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let sample = if self.jitter > 0.0 { rand::thread_rng().gen_range(0.0..self.jitter) } else { 0.0 };
        self.next_delay_with(current, sample)
    }

    /// `trunc(min(current * factor, max) * (1 + jitter_sample))`, in whole seconds.
    pub fn next_delay_with(&self, current: Duration, jitter_sample: f64) -> Duration {
        let grown = (current.as_secs_f64() * self.factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs((grown * (1.0 + jitter_sample)).trunc() as u64)
    }

    /// Whether to retry after `error` when the next wait would be `delay`.
    pub fn decide(&self, error: &RemoteError, delay: Duration) -> RetryDecision {
        if !error.is_retryable() {
            tracing::debug!("{} is not retryable", error);
            return RetryDecision::NoRetry;
        }
        if delay >= self.max_delay {
            tracing::debug!("Backoff reached {:?}, giving up", delay);
            return RetryDecision::NoRetry;
        }
        RetryDecision::Retry
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure or backoff exhausted
    NoRetry,
}

/// Boxed future returned by `Timer::sleep`.
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of retry waits.
pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> Sleep<'_>;
}

/// Waits on the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct InstantTimer {
    waits: Mutex<Vec<Duration>>,
}

impl InstantTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }
}

impl Timer for InstantTimer {
    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.waits.lock().push(duration);
        Box::pin(tokio::task::yield_now())
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the backoff reaches its cap.
///
/// # Returns
/// The successful value, or the last error.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    timer: &dyn Timer,
    mut operation: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("Request succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if config.decide(&e, delay) == RetryDecision::NoRetry {
                    if e.is_retryable() {
                        tracing::error!("All {} attempts failed, last error: {}", attempt, e);
                    }
                    return Err(e);
                }

                tracing::warn!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                timer.sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
        }
    }
}
