use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Back off exponentially and try again; consumes one retry.
    Retry,
    /// Wait exactly this long and try again; does not consume a retry.
    RetryAfter(Duration),
    Abort,
}

/// Exponential backoff configuration with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Upper bound on `RetryAfter` waits for one operation, so a throttling
    /// upstream cannot park a run forever.
    pub max_rate_limit_waits: u32,
    /// Wait used when a rate limit arrives without a hint.
    pub default_rate_limit_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_secs: 5,
            max_delay_secs: 60,
            max_rate_limit_waits: 10,
            default_rate_limit_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }

    pub fn default_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.default_rate_limit_secs)
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier said the error is not worth retrying.
    Aborted(E),
    /// Retries (or rate-limit waits) ran out. `attempts` counts every call.
    Exhausted { attempts: u32, last: E },
    /// The token fired while waiting to retry.
    Cancelled,
}

/// Retry an async operation with exponential backoff and jitter.
///
/// `classifier` maps each error to a [`RetryAction`]. Rate-limit waits are
/// tracked separately from retries. Every wait is abandoned as soon as
/// `cancel` fires.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;
    let mut attempts = 0u32;
    let mut retries = 0u32;
    let mut rate_limit_waits = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };

        let delay = match classifier(&err) {
            RetryAction::Abort => return Err(RetryError::Aborted(err)),
            RetryAction::Retry => {
                if retries >= config.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: err,
                    });
                }
                let delay = config.delay_for_retry(retries);
                retries += 1;
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}s: {}",
                    retries,
                    total_attempts,
                    delay.as_secs(),
                    err
                );
                delay
            }
            RetryAction::RetryAfter(wait) => {
                if rate_limit_waits >= config.max_rate_limit_waits {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: err,
                    });
                }
                rate_limit_waits += 1;
                tracing::warn!(
                    wait_secs = wait.as_secs(),
                    waits = rate_limit_waits,
                    "Rate limited, backing off: {}",
                    err
                );
                wait
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
        }
    }
}
