//! Bounded retry with a linearly growing delay.
//!
//! Shared by the delivery client (transient transport failures) and the
//! relational repository (connection-class database errors). Callers supply
//! the retryable-error predicate; the policy owns the attempt budget and the
//! delay schedule.

use std::future::Future;
use std::time::Duration;

/// Default attempt budget (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Delay before the second attempt (1 second).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Growth of the delay per further attempt (2 seconds), giving 1s, 3s, 5s.
pub const DEFAULT_DELAY_STEP: Duration = Duration::from_secs(2);

/// Retry policy: attempt budget plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    delay_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY, DEFAULT_DELAY_STEP)
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least one.
    pub const fn new(max_attempts: u32, initial_delay: Duration, delay_step: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            initial_delay,
            delay_step,
        }
    }

    /// A policy that never retries.
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay + self.delay_step * attempt.saturating_sub(1)
    }

    /// Sum of all delays when every attempt fails.
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
