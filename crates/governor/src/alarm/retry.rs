//! Bounded retry for alarm delivery

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Exponential backoff with jitter, capped in attempts and delay
///
/// Only the notification path ever sleeps on this policy.
///
/// # Example
///
/// ```
/// use poolwarden_governor::alarm::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(3)
///     .with_base_delay(Duration::from_millis(200))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.backoff(1), Duration::from_millis(200));
/// assert_eq!(policy.backoff(2), Duration::from_millis(400));
/// assert!(policy.allows_retry(2));
/// assert!(!policy.allows_retry(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total deliveries tried, the first one included
    pub max_attempts: u32,

    /// Wait before the first retry
    #[serde(rename = "baseDelayMs", with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound of any single wait
    #[serde(rename = "maxDelayMs", with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor between consecutive waits
    pub multiplier: f64,

    /// Random spread as a fraction of the wait (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 3 attempts, 500ms doubling up to 5s, ±10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Deliver once, never retry
    pub fn no_retry() -> Self {
        Self::fixed(Duration::ZERO, 1)
    }

    /// Same wait before every retry
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt may follow `attempts_made` failed ones
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Wait before the `retry`-th retry (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        // Deserialized policies skip the builder clamps
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let cap = self.max_delay.as_secs_f64();
        let grown = multiplier.powi((retry - 1).min(64) as i32);
        let wait = (self.base_delay.as_secs_f64() * grown).clamp(0.0, cap);

        let spread = wait * jitter;
        if spread <= 0.0 {
            return Duration::from_secs_f64(wait);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((wait + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(0.0);

        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_tolerates_deserialized_garbage() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "maxAttempts": 3,
            "baseDelayMs": 100,
            "maxDelayMs": 1000,
            "multiplier": -2.0,
            "jitter": 5.0
        }))
        .unwrap();

        for retry in 1..=4 {
            assert!(policy.backoff(retry) <= Duration::from_millis(200));
        }

        let nan = RetryPolicy {
            multiplier: f64::NAN,
            jitter: f64::NAN,
            ..RetryPolicy::exponential().with_base_delay(Duration::from_millis(100))
        };
        assert_eq!(nan.backoff(3), Duration::from_millis(100));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::exponential();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        let once = RetryPolicy::no_retry();
        assert!(!once.allows_retry(1));
        assert_eq!(once.backoff(1), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1000), 4).with_jitter(0.25);
        for _ in 0..100 {
            let wait = policy.backoff(1);
            assert!(wait >= Duration::from_millis(750));
            assert!(wait <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_wire_format() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["maxAttempts"], 4);
        assert_eq!(json["baseDelayMs"], 250);

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, policy);
    }
}
