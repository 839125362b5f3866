//! Retry policy: decides backoff delays and when to give up.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Retry policy for failed dispatch attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound before jitter.
    pub max_delay: Duration,

    /// Random spread as a fraction of the delay (0.2 = +-20%).
    pub jitter: f64,

    /// Attempts allowed before an entry is dead-lettered.
    pub max_attempts: u32,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    DeadLetter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(1),
            multiplier: 2.0,
            max_delay: Duration::seconds(300),
            jitter: 0.2,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, without jitter.
    ///
    /// `attempts` is the number of failed attempts so far (1-indexed):
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn base_delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.num_milliseconds() as f64;
        let delay_ms = (base_ms * self.multiplier.powi(exponent)).min(self.max_delay.num_milliseconds() as f64);
        Duration::milliseconds(delay_ms as i64)
    }

    /// Delay before the next attempt, with jitter. Never below 1ms.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.base_delay_for(attempts).num_milliseconds() as f64;
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::milliseconds(((base_ms * factor) as i64).max(1))
    }

    /// `attempts` counts the failure being handled.
    pub fn decide(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_attempts {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::RetryAt(now + self.next_delay(attempts))
        }
    }
}
