//! Coordinator timing and delivery settings

use std::time::Duration;

use handoff_common::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Coordinator configuration
///
/// All durations are in milliseconds so the struct maps one to one onto
/// TOML files and environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long a sender waits for the permission response
    pub approval_timeout_ms: u64,
    /// How long either side waits for the whole transfer once it is under way
    pub transfer_timeout_ms: u64,
    /// Grace period a finished session stays queryable
    pub cleanup_delay_ms: u64,
    /// Retry policy for ordinary protocol messages
    pub send_retry: RetryPolicy,
    /// Retry policy for the first, compact rejection
    pub reject_retry: RetryPolicy,
    /// Delay between the compact and the structured rejection
    pub reject_followup_delay_ms: u64,
    /// Delay before the last compact rejection when everything else failed
    pub reject_fallback_delay_ms: u64,
    /// Retry policy for the last compact rejection
    pub reject_fallback_retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            approval_timeout_ms: 30_000,
            transfer_timeout_ms: 60_000,
            cleanup_delay_ms: 3_000,
            send_retry: RetryPolicy::default(),
            reject_retry: RetryPolicy::with_attempts(5),
            reject_followup_delay_ms: 500,
            reject_fallback_delay_ms: 1_000,
            reject_fallback_retry: RetryPolicy::with_attempts(3),
        }
    }
}

impl CoordinatorConfig {
    /// Approval timeout
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    /// Full transfer timeout
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Cleanup grace period
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    /// Delay before the structured rejection
    pub fn reject_followup_delay(&self) -> Duration {
        Duration::from_millis(self.reject_followup_delay_ms)
    }

    /// Delay before the fallback rejection
    pub fn reject_fallback_delay(&self) -> Duration {
        Duration::from_millis(self.reject_fallback_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let json = r#"{"approval_timeout_ms": 5000, "send_retry": {"max_attempts": 1}}"#;
        let config: CoordinatorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.approval_timeout(), Duration::from_secs(5));
        assert_eq!(config.transfer_timeout(), Duration::from_secs(60));
        assert_eq!(config.send_retry.max_attempts, 1);
        assert_eq!(config.send_retry.base_delay_ms, 500);
        assert_eq!(config.reject_retry.max_attempts, 5);
    }
}
