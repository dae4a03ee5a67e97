//! Retry bounds and exponential backoff for transient network failures.

use std::time::Duration;

use serde::Deserialize;

/// How often and how patiently to retry a request that never completed.
///
/// Only connection and read failures are retried. A response carrying an
/// error status is final.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Seconds; the delay doubles with each consecutive failure.
    pub backoff_factor: f64,
    /// Upper bound on a single delay, in seconds.
    pub backoff_max: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.3,
            backoff_max: 120.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows `consecutive_failures` failures.
    ///
    /// The first retry is immediate; after that the delay is
    /// `backoff_factor * 2^(failures - 1)`, capped at `backoff_max`.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures <= 1 || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exp = (consecutive_failures - 1).min(62) as i32;
        let secs = (self.backoff_factor * 2f64.powi(exp)).min(self.backoff_max);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Worst-case total time spent sleeping before giving up.
    pub fn worst_case_delay(&self) -> Duration {
        (1..=self.max_retries).map(|n| self.delay_after(n)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::ZERO);
        assert_eq!(policy.delay_after(2), Duration::from_secs_f64(0.6));
        assert_eq!(policy.delay_after(3), Duration::from_secs_f64(1.2));
        assert!((policy.worst_case_delay().as_secs_f64() - 1.8).abs() < 1e-6);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 50,
            backoff_factor: 1.0,
            backoff_max: 10.0,
        };
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[test]
    fn zero_factor_never_sleeps() {
        let policy = RetryPolicy {
            backoff_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.worst_case_delay(), Duration::ZERO);
    }

    #[test]
    fn deserialize_partial_config() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff_factor, 0.3);
    }
}
