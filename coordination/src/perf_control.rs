//! Retry and backoff controls for model calls and background sampling
//!
//! Model training can fail transiently (a numerically unlucky start, a busy
//! blocking pool), and the resource sampler can fail to read system stats.
//! Both retry with the same exponential [`RetryPolicy`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use mle_ensemble::perf_control::{retry_with_backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::for_model_calls(3);
//! let fitted = retry_with_backoff(&policy, |e: &AgentError| e.is_retryable(), |_| fit_once()).await;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Policy for agent train calls: short initial backoff, doubling, 2s cap.
    pub fn for_model_calls(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 50,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }

    /// Policy for the resource sampler: retries forever, backing off to 30s.
    pub fn for_sampler() -> Self {
        Self {
            max_retries: u32::MAX,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }

    /// Calculate the backoff delay for a given attempt number (0-indexed).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        (delay as u64).min(self.max_backoff_ms)
    }

    /// Whether another retry is allowed given the attempt count.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Get the backoff as a Duration for a given attempt.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }
}

impl Default for RetryPolicy {
    /// Default: 2 retries, 500ms initial backoff, 2x multiplier, 5s max.
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the policy is
/// exhausted. `op` receives the 0-indexed attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && policy.should_retry(attempt) => {
                attempt += 1;
                let backoff = policy.backoff_duration(attempt);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "Retrying after backoff");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ms(0), 0);
        assert_eq!(policy.backoff_ms(1), 500);
        assert_eq!(policy.backoff_ms(2), 1000);
    }

    #[test]
    fn test_retry_policy_max_backoff() {
        let policy = RetryPolicy::for_sampler();
        assert_eq!(policy.backoff_ms(1), 1_000);
        assert_eq!(policy.backoff_ms(10), 30_000);
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy::for_model_calls(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::for_model_calls(0).should_retry(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::for_model_calls(3);
        let result: Result<u32, String> = retry_with_backoff(
            &policy,
            |_| true,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(format!("attempt {} failed", attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::for_model_calls(5);
        let result: Result<(), String> = retry_with_backoff(
            &policy,
            |e: &String| e != "fatal",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_policy_json_roundtrip() {
        let policy = RetryPolicy::for_model_calls(4);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_retries, 4);
        assert_eq!(parsed.initial_backoff_ms, 50);
    }
}
