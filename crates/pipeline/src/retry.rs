//! Bounded retry for phases whose failures are expected to be transient.

use crate::error::{PhaseError, PhaseResult};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// How many times a phase is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10))
    }
}

/// Callback trait for retry notifications.
pub trait RetryCallback {
    /// Called after a retryable failure, before sleeping.
    ///
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &PhaseError, delay: Duration);
}

/// No-op callback.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&mut self, _: u32, _: u32, _: &PhaseError, _: Duration) {}
}

/// Outcome of a retried operation: the result plus the attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: PhaseResult<T>,
    pub attempts: u32,
}

/// Execute an operation under a retry policy.
///
/// Non-retryable errors are returned immediately. Retryable errors are
/// retried until `max_attempts` is reached; the last error is returned.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: &mut dyn RetryCallback,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> PhaseResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() || attempt >= max_attempts => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(e) => {
                callback.on_retry(attempt, max_attempts, &e, policy.delay);
                log::debug!(
                    "attempt {attempt}/{max_attempts} failed: {e}; retrying in {:?}",
                    policy.delay
                );
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_success_first_try() {
        let attempted = with_retry(&RetryPolicy::once(), &mut NoCallback, || Ok(42));
        assert_eq!(attempted.result.unwrap(), 42);
        assert_eq!(attempted.attempts, 1);
    }

    #[test]
    fn test_fatal_error_short_circuits() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let attempted: Attempted<()> = with_retry(&fast(5), &mut NoCallback, || {
            calls_clone.set(calls_clone.get() + 1);
            Err(PhaseError::credential_unavailable("token"))
        });

        assert!(attempted.result.is_err());
        assert_eq!(calls.get(), 1);
        assert_eq!(attempted.attempts, 1);
    }

    #[test]
    fn test_eventual_success() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let attempted = with_retry(&fast(3), &mut NoCallback, || {
            let current = calls_clone.get();
            calls_clone.set(current + 1);
            if current < 2 {
                Err(PhaseError::connectivity("connection refused"))
            } else {
                Ok("up")
            }
        });

        assert_eq!(attempted.result.unwrap(), "up");
        assert_eq!(attempted.attempts, 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let attempted: Attempted<()> = with_retry(&fast(3), &mut NoCallback, || {
            calls_clone.set(calls_clone.get() + 1);
            Err(PhaseError::connectivity("timeout"))
        });

        assert_eq!(attempted.result.unwrap_err().kind, ErrorKind::Connectivity);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(u32);
        impl RetryCallback for Counting {
            fn on_retry(&mut self, _: u32, _: u32, _: &PhaseError, _: Duration) {
                self.0 += 1;
            }
        }

        let mut callback = Counting(0);
        let _: Attempted<()> = with_retry(&fast(3), &mut callback, || {
            Err(PhaseError::connectivity("timeout"))
        });

        // Not after the last attempt
        assert_eq!(callback.0, 2);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        };
        let attempted = with_retry(&policy, &mut NoCallback, || Ok(()));
        assert_eq!(attempted.attempts, 1);
    }
}
