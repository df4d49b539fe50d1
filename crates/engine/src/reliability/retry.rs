//! Retry policy implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration for a task
///
/// Delays are fixed: every retry waits the same `retry_delay`. The first
/// attempt is never delayed.
///
/// # Example
///
/// ```
/// use taskloom_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(2, Duration::from_millis(500));
///
/// assert_eq!(policy.max_attempts(), 3);
/// assert!(policy.has_attempts_remaining(2));
/// assert!(!policy.has_attempts_remaining(3));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before each retry
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts
    pub fn fixed(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Maximum number of attempts (including the first)
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.retry_delay
        }
    }

    /// Check if another attempt may follow `current_attempt`
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts()
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);

        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn test_max_attempts_saturates() {
        let policy = RetryPolicy::fixed(u32::MAX, Duration::ZERO);
        assert_eq!(policy.max_attempts(), u32::MAX);
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::fixed(4, Duration::from_millis(1500));

        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["retry_delay"], 1500);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(policy, parsed);
    }
}
