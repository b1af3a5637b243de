use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;

/// Failure modes of a single page fetch, classified for the retry loop.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Timeout, refused connection, dropped body or an upstream "try again
    /// later" answer. Worth retrying with backoff.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The upstream throttled us. `retry_after` is its hint, if it gave one.
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials were rejected. Needs operator intervention.
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    /// Any other non-success answer, or a body we could not decode.
    #[error("Upstream error (status {status}): {detail}")]
    Upstream { status: u16, detail: String },
}

impl FetchError {
    /// Map a transport-level reqwest failure.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Self::Upstream {
                status: 0,
                detail: e.to_string(),
            };
        }
        // Strip the URL: it carries the API key.
        Self::Transient(e.without_url().to_string())
    }

    /// How the page retry loop should react to this error.
    ///
    /// `default_wait` applies to rate limits that arrive without a hint.
    pub fn retry_action(&self, default_wait: Duration) -> RetryAction {
        match self {
            Self::Transient(_) => RetryAction::Retry,
            Self::RateLimited { retry_after } => {
                RetryAction::RetryAfter(retry_after.unwrap_or(default_wait))
            }
            Self::Authentication(_) | Self::Upstream { .. } => RetryAction::Abort,
        }
    }
}
