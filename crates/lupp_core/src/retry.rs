use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::api::ApiError;

/// Caller-side retry for transient API failures. The adapter itself never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 0,
        }
    }

    pub fn run<T>(&self, mut operation: impl FnMut() -> Result<T, ApiError>) -> Result<T, ApiError> {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries && error.is_transient() => {
                    debug!(attempt, error = %error, "retrying transient API failure");
                    sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        if self.retry_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        Duration::from_millis(base.saturating_add(jitter))
    }
}
