//! Whole-operation retry with exponential backoff.

use std::time::Duration;
use tracing::warn;

/// Upper bound on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry; doubled for each subsequent one
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// The operation failed on every attempt.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: anyhow::Error,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Most attempts `run` will make, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    pub fn run<T, F>(&self, what: &str, op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> anyhow::Result<T>,
    {
        self.run_if(what, |_| true, op)
    }

    /// Like [`RetryPolicy::run`], but gives up at once on errors for which
    /// `retryable` is false.
    pub fn run_if<T, F, R>(&self, what: &str, retryable: R, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> anyhow::Result<T>,
        R: Fn(&anyhow::Error) -> bool,
    {
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempt > self.max_retries || !retryable(&error) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{:#}", error),
                        "retry:attempt failed"
                    );
                    println!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {:#}",
                        what,
                        attempt,
                        self.max_attempts(),
                        delay,
                        error
                    );
                    std::thread::sleep(delay);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}
