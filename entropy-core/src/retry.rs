//! Retry logic with exponential backoff and jitter

use crate::{Error, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest single sleep between cancellation checks
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Run a blocking operation, retrying retryable failures with backoff.
    ///
    /// `on_failure` runs after each retryable failure, before sleeping; the
    /// device producer uses it to reopen the device. Cancellation during a
    /// backoff ends the loop with [`Error::Cancelled`].
    pub fn execute<T, F, R>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_failure: R,
    ) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        R: FnMut(&Error),
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            attempt += 1;

            match operation() {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "Operation failed (attempt {}/{}): {}. Retrying after {:?}",
                        attempt, self.max_attempts, e, backoff
                    );
                    on_failure(&e);

                    if !Self::sleep_unless_cancelled(backoff, cancel) {
                        return Err(Error::Cancelled);
                    }

                    // Calculate next backoff with exponential growth
                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
                    );

                    if self.jitter {
                        backoff = self.add_jitter(backoff);
                    }
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Returns false if cancelled before `duration` elapsed
    fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }

    fn add_jitter(&self, duration: Duration) -> Duration {
        use rand::Rng;
        let jitter_ms = rand::thread_rng().gen_range(0..=duration.as_millis() / 4);
        duration + Duration::from_millis(jitter_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_retry_success() {
        let mut attempts = 0;
        let mut failures = 0;

        let result = fast_policy(5).execute(
            &CancellationToken::new(),
            || {
                attempts += 1;
                if attempts < 3 {
                    Err(Error::Device("unplugged".into()))
                } else {
                    Ok(42)
                }
            },
            |_| failures += 1,
        );

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_retry_exhausted() {
        let result = fast_policy(2).execute(
            &CancellationToken::new(),
            || Err::<(), _>(Error::Timeout),
            |_| {},
        );
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn test_non_retryable_fails_fast() {
        let mut attempts = 0;
        let result = fast_policy(5).execute(
            &CancellationToken::new(),
            || {
                attempts += 1;
                Err::<(), _>(Error::Config("bad".into()))
            },
            |_| {},
        );
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_cancelled_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fast_policy(5).execute(&cancel, || Err::<(), _>(Error::Timeout), |_| {});
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..32 {
            let jittered = policy.add_jitter(Duration::from_millis(400));
            assert!(jittered >= Duration::from_millis(400));
            assert!(jittered <= Duration::from_millis(500));
        }
    }
}
