//! Retry policy with capped exponential backoff

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("Backoff multiplier must be a finite number greater than 1, got {0}")]
    InvalidMultiplier(f64),
    #[error("Initial backoff {initial:?} exceeds max backoff {max:?}")]
    InitialExceedsMax { initial: Duration, max: Duration },
}

/// Immutable retry configuration.
///
/// `backoff(n) = min(initial_backoff * multiplier^n, max_backoff)` with a
/// zero-based retry count. No jitter: the same count always yields the same delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
    ) -> Result<Self, RetryPolicyError> {
        if !multiplier.is_finite() || multiplier <= 1.0 {
            return Err(RetryPolicyError::InvalidMultiplier(multiplier));
        }
        if initial_backoff > max_backoff {
            return Err(RetryPolicyError::InitialExceedsMax {
                initial: initial_backoff,
                max: max_backoff,
            });
        }

        Ok(Self {
            max_retries,
            initial_backoff,
            max_backoff,
            multiplier,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Whether another attempt is allowed after `retry_count` retries
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before retry number `retry_count + 1`
    pub fn backoff(&self, retry_count: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let cap = self.max_backoff.as_secs_f64();
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);

        // powi overflows to infinity for large counts
        if !delay.is_finite() || delay >= cap {
            return self.max_backoff;
        }
        Duration::from_secs_f64(delay).min(self.max_backoff)
    }
}
