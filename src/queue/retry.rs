//! Backoff between attempts of one queue entry

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential delay, no jitter.
///
/// After `n` failed attempts the next attempt waits
/// `min(initial * multiplier^(n-1), max)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Retry immediately; used by tests and tooling
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: self.multiplier.max(1.0),
            max_interval: self.max,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Wait required after `failed_attempts` failures
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let mut backoff = self.backoff();
        let mut delay = self.initial.min(self.max);
        for _ in 0..failed_attempts {
            delay = match backoff.next_backoff() {
                Some(next) => next,
                None => self.max,
            };
            if delay >= self.max {
                delay = self.max;
                break;
            }
        }
        // ExponentialBackoff may add sub-millisecond noise
        Duration::from_millis(delay.as_millis() as u64)
    }
}
