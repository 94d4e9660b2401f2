//! Harvest-level retry envelope
//!
//! Wraps a whole engine attempt in exponential backoff. The retry budget is
//! shared with the engine itself: every successfully written row records a
//! success, and a long healthy stretch resets the lifetime retry counter so
//! an earlier rough patch does not count against a later one.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::github::error::ApiRetryableError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts before the envelope gives up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
    /// Consecutive successes that earn a fresh retry budget.
    pub success_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            success_threshold: 5,
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-based):
    /// `min(initial_delay * backoff_factor^(attempt - 1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Mutable retry bookkeeping shared between the envelope and the engine.
#[derive(Debug)]
pub struct RetryState {
    success_threshold: u32,
    /// Failures since the last budget reset. Compared against `max_attempts`.
    pub retry_count: u32,
    pub consecutive_successes: u32,
    /// Lifetime failure count, never reset. Reporting only.
    pub total_retries: u64,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new(success_threshold: u32) -> Self {
        Self {
            success_threshold,
            retry_count: 0,
            consecutive_successes: 0,
            total_retries: 0,
            last_error: None,
        }
    }

    /// Records one success. Reaching the threshold resets both the
    /// consecutive-success counter and the retry counter.
    pub fn record_success(&mut self) {
        self.consecutive_successes += 1;
        if self.success_threshold > 0 && self.consecutive_successes >= self.success_threshold {
            debug!(
                "{} consecutive successes, retry budget reset",
                self.consecutive_successes
            );
            self.consecutive_successes = 0;
            self.retry_count = 0;
        }
    }

    /// Records one failure and returns the retry count it brought us to.
    pub fn record_failure(&mut self, error: &anyhow::Error) -> u32 {
        self.consecutive_successes = 0;
        self.retry_count += 1;
        self.total_retries += 1;
        self.last_error = Some(format!("{error:#}"));
        self.retry_count
    }
}

pub type SharedRetryState = Arc<Mutex<RetryState>>;

pub fn shared_retry_state(success_threshold: u32) -> SharedRetryState {
    Arc::new(Mutex::new(RetryState::new(success_threshold)))
}

/// Aggregate error reported after the envelope gives up.
#[derive(Debug, Clone)]
pub struct RetryExhaustedError {
    pub attempts: u32,
    pub last_error: String,
}

impl std::fmt::Display for RetryExhaustedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "retries exhausted after {} attempts, last error: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for RetryExhaustedError {}

/// Notifier invoked before each backoff sleep.
pub type RetryNotifier = Box<dyn Fn(u32, Duration, &anyhow::Error) + Send + Sync>;

/// Whether an error is pointless to retry at the harvest level.
pub fn is_terminal(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ApiRetryableError>(),
        Some(ApiRetryableError::NonRetryable(_))
    )
}

/// Runs `action` until it succeeds, a non-retryable error surfaces, or the
/// retry budget is spent.
///
/// The action may have side effects (rows written, state persisted); nothing
/// is rolled back here. Re-entrancy is the action's job: it consults durable
/// state and skips work already done.
pub async fn run_with_retry<T, F, Fut>(
    config: &RetryConfig,
    state: SharedRetryState,
    on_retry: Option<&RetryNotifier>,
    mut action: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match action().await {
            Ok(value) => {
                state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_success();
                return Ok(value);
            }
            Err(error) if is_terminal(&error) => {
                warn!("Giving up without retry: {:#}", error);
                return Err(error);
            }
            Err(error) => {
                let attempt = state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_failure(&error);

                if attempt >= config.max_attempts {
                    let last_error = format!("{error:#}");
                    warn!(
                        "Retries exhausted after {} attempts: {}",
                        attempt, last_error
                    );
                    return Err(anyhow::Error::new(RetryExhaustedError {
                        attempts: attempt,
                        last_error,
                    }));
                }

                let delay = config.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed ({:#}), retrying in {:?}",
                    attempt, config.max_attempts, error, delay
                );
                if let Some(notifier) = on_retry {
                    notifier(attempt, delay, &error);
                }
                sleep(delay).await;
            }
        }
    }
}
