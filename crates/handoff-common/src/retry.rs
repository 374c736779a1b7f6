//! Retry policy for unreliable sends

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Linear backoff retry policy
///
/// Attempt `n` (1-based) that fails waits `n * base_delay`, capped at
/// `max_delay`, before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one is always made
    pub max_attempts: u32,
    /// Backoff step in milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` and the default backoff
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay after the failed attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_ms.saturating_mul(u64::from(attempt));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run `attempt` until it reports success or the attempts are exhausted
    ///
    /// Returns whether any attempt succeeded.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> bool
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let max_attempts = self.max_attempts.max(1);

        for n in 1..=max_attempts {
            if attempt(n).await {
                return true;
            }

            if n < max_attempts {
                let delay = self.delay_for(n);
                tracing::debug!(
                    "Attempt {}/{} failed, retrying in {}ms",
                    n,
                    max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }

        false
    }
}
