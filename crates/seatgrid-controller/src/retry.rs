//! Bounded retry with exponential backoff for directory calls.

use std::time::Duration;

use tracing::debug;

use seatgrid_state::{StateError, StateResult};

/// Retry settings for transient directory errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, first one included.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base doubled per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors with [`is_transient`](seatgrid_state::StateError::is_transient)
    /// are retried.
    pub async fn run<T, F>(&self, what: &str, op: F) -> StateResult<T>
    where
        F: FnMut() -> StateResult<T>,
    {
        self.run_while(what, StateError::is_transient, op).await
    }

    /// Like [`run`](Self::run), retrying only errors `retryable` accepts.
    pub async fn run_while<T, F, P>(&self, what: &str, retryable: P, mut op: F) -> StateResult<T>
    where
        F: FnMut() -> StateResult<T>,
        P: Fn(&StateError) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(%what, attempt = attempt + 1, ?delay, error = %e, "transient directory error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
