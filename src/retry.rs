//! Fixed-delay retry combinator.
//!
//! DESIGN
//! ======
//! The attempt loop behind the session fetcher.
//! An attempt either yields a usable value (`Ok(Some)`), reports "not yet
//! usable" (`Ok(None)`), or fails (`Err`). Attempts run strictly in
//! sequence with a fixed sleep between them; there is no sleep after the
//! final attempt and never more than `max_attempts` calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Attempt budget and fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Single attempt, no delay.
    #[must_use]
    pub const fn once() -> Self {
        Self { max_attempts: 1, delay: Duration::ZERO }
    }

    /// Effective attempt count. Zero is treated as one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(DEFAULT_DELAY_MS))
    }
}

/// Run `op` until it yields a usable value or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. Returns `Ok(None)` when the
/// final attempt was "not yet usable" and `Err` with the final attempt's
/// error when it failed.
///
/// # Errors
///
/// Propagates the error produced by the final attempt.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<Option<T>, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let total = policy.attempts();
    for attempt in 1..=total {
        let last = attempt == total;
        match op(attempt).await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) if last => return Ok(None),
            Err(e) if last => return Err(e),
            Ok(None) => {
                debug!(label, attempt, total, "not yet usable; retrying");
            }
            Err(e) => {
                warn!(label, error = %e, attempt, total, "attempt failed; retrying");
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
    Ok(None)
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
