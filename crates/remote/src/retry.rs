//! Call-level retry for individual remote operations.
//!
//! Only timeouts are retried here, with a linear backoff of
//! `attempt * backoff`. Anything else goes straight back to the caller,
//! where the job-level policy decides what happens to the job.

use std::future::Future;
use std::time::Duration;

use hubqueue_core::classify::ErrorClassifier;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::service::Operation;

/// Tunable parameters for call-level retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRetry {
    /// Total attempts per call, including the first one.
    pub attempts: u32,
    /// Backoff unit between upload attempts.
    pub upload_backoff: Duration,
    /// Backoff unit between submit attempts.
    pub submit_backoff: Duration,
}

impl Default for CallRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            upload_backoff: Duration::from_secs(2),
            submit_backoff: Duration::from_secs(3),
        }
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn linear_delay(attempt: u32, backoff: Duration) -> Duration {
    backoff.saturating_mul(attempt)
}

/// Run `call` up to `attempts` times, retrying only timeout failures.
///
/// Returns the last error once the budget is spent.
pub async fn retry_on_timeout<T, F, Fut>(
    operation: Operation,
    attempts: u32,
    backoff: Duration,
    classifier: &ErrorClassifier,
    mut call: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let retryable = classifier.is_timeout(&e.to_string());
                if !retryable || attempt >= attempts {
                    return Err(e);
                }
                let delay = linear_delay(attempt, backoff);
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Remote call timed out, retrying",
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
