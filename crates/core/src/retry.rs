//! Job-level retry and backoff policy.
//!
//! Two transient causes grow differently:
//!
//! - timeouts: `timeout_count * timeout_step + jitter(5s..=15s)`, scaling
//!   with how often this particular job has timed out;
//! - rate limits: `base ^ retry_count + jitter(1s..=3s)`, classic
//!   exponential backoff over all retries of the job.
//!
//! The policy is pure: it receives the counters and a random source and
//! returns the updated counters. The caller applies them to the job.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::classify::ErrorClass;

/// Default job-level retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Inclusive random range added on top of a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rng.random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay added per recorded timeout of the job.
    pub timeout_step: Duration,
    pub timeout_jitter: Jitter,
    /// Base of the exponential rate-limit backoff, in seconds.
    pub rate_limit_base_secs: f64,
    pub rate_limit_jitter: Jitter,
    /// Upper bound on any single computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_step: Duration::from_secs(10),
            timeout_jitter: Jitter::new(Duration::from_secs(5), Duration::from_secs(15)),
            rate_limit_base_secs: 2.0,
            rate_limit_jitter: Jitter::new(Duration::from_secs(1), Duration::from_secs(3)),
            max_delay: Duration::from_secs(600),
        }
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Wait `delay`, then put the job back at the tail of the queue.
    Retry {
        delay: Duration,
        retry_count: u32,
        timeout_count: u32,
    },
    /// Fail the job for good. `timeout_count` still reflects this failure.
    GiveUp { timeout_count: u32 },
}

impl RetryPolicy {
    pub fn decide<R: Rng + ?Sized>(
        &self,
        class: ErrorClass,
        retry_count: u32,
        timeout_count: u32,
        rng: &mut R,
    ) -> RetryDecision {
        let timeout_count = if class == ErrorClass::Timeout {
            timeout_count.saturating_add(1)
        } else {
            timeout_count
        };

        if !class.is_transient() || retry_count >= self.max_retries {
            return RetryDecision::GiveUp { timeout_count };
        }

        let retry_count = retry_count + 1;
        let base = match class {
            ErrorClass::Timeout => {
                self.timeout_step.saturating_mul(timeout_count) + self.timeout_jitter.sample(rng)
            }
            _ => {
                let exp = self.rate_limit_base_secs.powi(retry_count as i32);
                Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
                    + self.rate_limit_jitter.sample(rng)
            }
        };

        RetryDecision::Retry {
            delay: base.min(self.max_delay),
            retry_count,
            timeout_count,
        }
    }
}
