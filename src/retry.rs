//! Retry with exponential backoff
//!
//! Generic wrapper used by every layer above it. Fatal errors are re-raised
//! immediately; everything else is retried up to the attempt budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base delay in seconds
    pub base_delay: f64,
    /// Upper clamp in seconds
    pub max_delay: f64,
    pub exponential_base: f64,
    /// Multiplicative jitter bounds, None disables jitter
    pub jitter: Option<(f64, f64)>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: 1.0,
            max_delay: 30.0,
            exponential_base: 2.0,
            jitter: Some((0.5, 1.5)),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay * self.exponential_base.powi(attempt as i32);
        let mut secs = raw.min(self.max_delay);

        if let Some((lo, hi)) = self.jitter {
            let factor = rand::thread_rng().gen_range(lo..hi);
            secs *= factor;
        }

        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Run `op` under `policy`, returning the first success or the last error.
///
/// Fatal errors (see [`Error::is_fatal`]) propagate on the spot without
/// consuming the remaining budget.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = String::new();

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay(attempt);
                    tracing::warn!(
                        "Attempt {}/{} failed: {} - retrying in {:.2}s",
                        attempt + 1,
                        policy.max_attempts,
                        last_error,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::error!(
                        "All {} attempts failed: {}",
                        policy.max_attempts,
                        last_error
                    );
                }
            }
        }
    }

    Err(Error::RetryExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Explicit loop-driving retry state for multi-step logic
/// where a closure wrapper does not fit.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// More attempts left in the budget?
    pub fn should_retry(&self) -> bool {
        self.attempt < self.policy.max_attempts
    }

    /// Record a failure and sleep out the backoff delay.
    ///
    /// Re-raises fatal errors; returns `RetryExhausted` once the budget is
    /// spent so callers can `?` straight out of their loop.
    pub async fn handle_failure(&mut self, error: Error) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }

        self.last_error = Some(error.to_string());
        self.attempt += 1;

        if self.attempt >= self.policy.max_attempts {
            return Err(Error::RetryExhausted {
                attempts: self.policy.max_attempts,
                last_error: self.last_error.clone().unwrap_or_default(),
            });
        }

        let delay = self.policy.delay(self.attempt - 1);
        tracing::warn!(
            "Attempt {}/{} failed: {} - retrying in {:.2}s",
            self.attempt,
            self.policy.max_attempts,
            self.last_error.as_deref().unwrap_or(""),
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(base: f64, max: f64, exp: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: base,
            max_delay: max,
            exponential_base: exp,
            jitter: None,
        }
    }

    #[test]
    fn test_delay_first_attempt_is_base() {
        let policy = no_jitter(1.0, 30.0, 2.0);
        assert_eq!(policy.delay(0), Duration::from_secs_f64(1.0));
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = no_jitter(1.0, 30.0, 2.0);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay(2), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_delay_clamped_to_max() {
        let policy = no_jitter(1.0, 10.0, 2.0);
        // 1 * 2^3 = 8 < 10, 1 * 2^4 = 16 -> clamped
        assert_eq!(policy.delay(4), Duration::from_secs_f64(10.0));

        let heavy = no_jitter(100.0, 10.0, 2.0);
        assert_eq!(heavy.delay(3), Duration::from_secs_f64(10.0));
    }

    #[test]
    fn test_delay_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter: Some((0.5, 1.5)),
            ..no_jitter(2.0, 60.0, 2.0)
        };
        for _ in 0..50 {
            let d = policy.delay(0).as_secs_f64();
            assert!((1.0..3.0).contains(&d), "delay {} out of jitter bounds", d);
        }
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: 0.001,
            jitter: None,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32> = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(Error::Navigation("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_fatal_short_circuits() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: 0.001,
            jitter: None,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32> = retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::UnsupportedUrl("nope".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::UnsupportedUrl(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: 0.001,
            jitter: None,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32> = retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Timeout("still down".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetryExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("still down"));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_state_loop() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: 0.001,
            jitter: None,
            ..Default::default()
        };
        let mut state = RetryState::new(policy);

        assert!(state.should_retry());
        state
            .handle_failure(Error::Navigation("first".into()))
            .await
            .unwrap();
        assert_eq!(state.attempt(), 1);

        let exhausted = state
            .handle_failure(Error::Navigation("second".into()))
            .await;
        assert!(matches!(exhausted, Err(Error::RetryExhausted { .. })));
    }
}
