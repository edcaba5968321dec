//! Retry configuration and strategies.
//!
//! Two layers retry a call:
//!
//! - [`RetryCallback`] is a chain callback re-running the rest of the chain
//!   with a [`BackoffStrategy`] between attempts.
//! - [`RetryConfig`] drives native retries of the network dispatch itself,
//!   inside the terminal action.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::callback::{Callback, Next};
use crate::{HttpClientError, Response, Result};

/// Predicate deciding whether a native attempt should be retried.
pub type RetryConditionFn = Arc<dyn Fn(&Result<Response>) -> bool + Send + Sync>;

/// Cap applied to chain backoff delays.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each attempt.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => {
                let total = delay.saturating_mul(attempt.saturating_add(1));
                total.min(*max)
            }
            Self::Exponential { initial, max, multiplier } => {
                let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
                let millis = (initial.as_millis() as f64 * factor).min(u64::MAX as f64) as u64;
                Duration::from_millis(millis).min(*max)
            }
        }
    }
}

/// Chain retry configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay between attempts.
    pub strategy: BackoffStrategy,
}

impl BackoffConfig {
    /// Linearly growing delay: `wait`, `2 * wait`, `3 * wait`, ...
    pub fn linear(retries: u32, wait: Duration) -> Self {
        Self {
            retries,
            strategy: BackoffStrategy::Linear {
                delay: wait,
                max: MAX_BACKOFF,
            },
        }
    }

    /// Doubling delay: `wait`, `2 * wait`, `4 * wait`, ...
    pub fn exponential(retries: u32, wait: Duration) -> Self {
        Self {
            retries,
            strategy: BackoffStrategy::Exponential {
                initial: wait,
                max: MAX_BACKOFF,
                multiplier: 2.0,
            },
        }
    }

    /// Pick linear or exponential backoff.
    pub fn new(retries: u32, wait: Duration, exponential: bool) -> Self {
        if exponential {
            Self::exponential(retries, wait)
        } else {
            Self::linear(retries, wait)
        }
    }
}

/// Chain callback re-running the rest of the chain until it succeeds or the
/// retries are used up. The last error is returned.
#[derive(Debug, Clone)]
pub struct RetryCallback {
    config: BackoffConfig,
}

impl RetryCallback {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Callback for RetryCallback {
    async fn call(&self, next: Next<'_>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match next.run().await {
                Ok(response) => return Ok(response),
                // An open circuit is not retried
                Err(HttpClientError::CircuitOpen) => return Err(HttpClientError::CircuitOpen),
                Err(e) if attempt < self.config.retries => {
                    let delay = self.config.strategy.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        error = %e,
                        delay = ?delay,
                        "Retrying request"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Native retry configuration applied around each network dispatch.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables native retries.
    pub retry_count: u32,
    /// Base wait between attempts.
    pub wait_time: Duration,
    /// Maximum wait between attempts.
    pub max_wait_time: Duration,
    /// Extra predicates; any returning true triggers a retry.
    pub conditions: Vec<RetryConditionFn>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: 0,
            wait_time: Duration::from_millis(100),
            max_wait_time: Duration::from_secs(2),
            conditions: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        BackoffStrategy::Exponential {
            initial: self.wait_time,
            max: self.max_wait_time,
            multiplier: 2.0,
        }
        .delay_for_attempt(attempt)
    }

    /// Check whether attempt `attempt` (0-indexed) should be followed by another.
    pub fn should_retry(&self, attempt: u32, result: &Result<Response>) -> bool {
        if attempt >= self.retry_count {
            return false;
        }

        let retryable_error = matches!(result, Err(e) if e.is_retryable());
        retryable_error || self.conditions.iter().any(|condition| condition(result))
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("retry_count", &self.retry_count)
            .field("wait_time", &self.wait_time)
            .field("max_wait_time", &self.max_wait_time)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}
