//! Retry decisions and backoff delays

use std::time::Duration;

use http::{header, HeaderMap};
use serde::Deserialize;

use crate::ErrorKind;

/// Default cap on the delay between attempts
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// How the delay grows between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `delay * 2^(n-1)` after the `n`th failed attempt
    #[default]
    Exponential,
    /// `delay * n` after the `n`th failed attempt
    Linear,
    /// `delay` after every failed attempt
    Fixed,
}

/// Bounds on how often and how patiently a request is retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Constructs an exponential policy
    ///
    /// `max_attempts` counts every attempt including the first, and is at
    /// least one. Delays are capped at 30 seconds.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Sets how the delay grows
    pub fn with_strategy(self, strategy: BackoffStrategy) -> Self {
        Self { strategy, ..self }
    }

    /// Sets the cap on any single delay
    pub fn with_max_delay(self, max_delay: Duration) -> Self {
        Self { max_delay, ..self }
    }

    /// Total number of attempts allowed
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay after the `attempt`th failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Fixed => self.base_delay,
        };
        delay.min(self.max_delay)
    }

    /// Begins tracking a new request
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempt: 1,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then attempt again
    Retry {
        /// How long to wait
        delay: Duration,
    },
    /// The failure is not retryable
    GiveUp,
    /// The failure is retryable, but no attempts remain
    Exhausted,
}

/// Per-request retry state
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// The current attempt, starting at one
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Number of retries made so far
    #[inline]
    pub fn retry_count(&self) -> u32 {
        self.attempt - 1
    }

    /// Reports a failure of the current attempt and decides what to do next
    ///
    /// A server-provided `retry_after` replaces the computed backoff for
    /// rate-limited and server errors, capped at the policy's maximum delay.
    pub fn on_failure(&mut self, kind: ErrorKind, retry_after: Option<Duration>) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }

        if self.attempt >= self.policy.max_attempts {
            return RetryDecision::Exhausted;
        }

        let delay = match (kind, retry_after) {
            (ErrorKind::RateLimited | ErrorKind::ServerError, Some(after)) => {
                after.min(self.policy.max_delay)
            }
            _ => self.policy.backoff(self.attempt),
        };

        self.attempt += 1;
        RetryDecision::Retry { delay }
    }
}

/// Reads a `Retry-After` header given in seconds
///
/// HTTP-date values are not understood and yield `None`.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
