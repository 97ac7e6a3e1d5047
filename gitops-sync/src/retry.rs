//! Bounded exponential backoff.
//!
//! Network calls are not retried in general; a failure is fatal to the
//! invocation and left to the caller (usually the CI job). The exceptions
//! are the PR coordinator's create call and the push coordinator's wait for
//! a concurrent writer's ref lock.

use std::time::Duration;

/// Attempt count and delays of [`with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted. The last error is returned.
pub fn with_backoff<T, E, F, R>(policy: &Backoff, mut op: F, retryable: R) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && retryable(&err) => {
                let delay = policy.delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
