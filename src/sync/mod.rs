//! Sync controllers: incremental (and thorough), full, and gap backfill.
//!
//! Controllers are stateless with respect to records. They pull pages from a
//! [`ScrobbleSource`], push every record through
//! [`ScrobbleStore::insert_if_absent`], and account for what happened in a
//! [`SyncReport`]. The report is passed in by `&mut` so the counters of a run
//! that fails halfway are still available to the caller.

pub mod full;
pub mod gaps;
pub mod incremental;
pub mod service;

pub use gaps::{GapFix, GapRange};
pub use service::SyncService;

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::lastfm::{FetchError, PageRequest, ScrobblePage, ScrobbleSource};
use crate::retry::{retry_with_backoff, RetryConfig, RetryError};
use crate::state::{InsertOutcome, ScrobbleStore, StateError, SyncRunStats};
use crate::types::SyncMode;

/// Tunables shared by every controller.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Consecutive already-stored records that mark the frontier as re-met.
    pub consecutive_threshold: u32,
    /// Page budget of an incremental run.
    pub max_pages: u32,
    /// Page budget of a thorough run.
    pub thorough_pages: u32,
    /// Silent stretches longer than this many seconds are suspicious.
    pub gap_threshold_secs: i64,
    pub retry: RetryConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            consecutive_threshold: 50,
            max_pages: 5,
            thorough_pages: 20,
            gap_threshold_secs: 3600,
            retry: RetryConfig::default(),
        }
    }
}

/// Why a controller stopped fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Enough consecutive stored records at or behind the frontier.
    CaughtUp,
    /// The page budget ran out.
    PageBudget,
    /// The upstream has no further pages.
    EndOfHistory,
    /// The cancellation token fired between pages or during a backoff.
    Cancelled,
    /// The run ended with an error.
    Failed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaughtUp => "caught up with stored history",
            Self::PageBudget => "page budget reached",
            Self::EndOfHistory => "no more pages upstream",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Upstream failure on page {page}: {source}")]
    Upstream { page: u32, source: FetchError },

    #[error("Page {page} still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        page: u32,
        attempts: u32,
        source: FetchError,
    },

    #[error(transparent)]
    Store(#[from] StateError),
}

impl SyncError {
    /// Fatal errors will fail again on the next scheduled run until an
    /// operator steps in. Exhausted retries may clear up on their own.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Outcome of one controller run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub pages_fetched: u32,
    pub inserted: u64,
    pub already_present: u64,
    pub stop: StopReason,
    pub frontier_before: Option<i64>,
    pub frontier_after: Option<i64>,
}

impl SyncReport {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            pages_fetched: 0,
            inserted: 0,
            already_present: 0,
            stop: StopReason::Failed,
            frontier_before: None,
            frontier_after: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::AlreadyExists => self.already_present += 1,
        }
    }

    /// Counters persisted to the `sync_runs` table.
    pub fn run_stats(&self, error: Option<&SyncError>) -> SyncRunStats {
        SyncRunStats {
            pages_fetched: u64::from(self.pages_fetched),
            inserted: self.inserted,
            already_present: self.already_present,
            interrupted: self.stop == StopReason::Cancelled,
            error: error.map(ToString::to_string),
        }
    }
}

/// Fetch one page under the retry policy.
///
/// Returns `Ok(None)` when cancellation interrupted a backoff sleep.
pub(crate) async fn fetch_page(
    source: &dyn ScrobbleSource,
    request: PageRequest,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<Option<ScrobblePage>, SyncError> {
    let default_wait = retry.default_rate_limit_wait();
    let result = retry_with_backoff(
        retry,
        cancel,
        |e: &FetchError| e.retry_action(default_wait),
        || source.fetch_page(request),
    )
    .await;

    match result {
        Ok(page) => Ok(Some(page)),
        Err(RetryError::Cancelled) => Ok(None),
        Err(RetryError::Aborted(FetchError::Authentication(detail))) => {
            Err(SyncError::Authentication(detail))
        }
        Err(RetryError::Aborted(upstream)) => Err(SyncError::Upstream {
            page: request.page,
            source: upstream,
        }),
        Err(RetryError::Exhausted { attempts, last }) => Err(SyncError::RetriesExhausted {
            page: request.page,
            attempts,
            source: last,
        }),
    }
}

/// Insert every record of a page, newest first, updating `report`.
pub(crate) async fn store_page(
    store: &dyn ScrobbleStore,
    page: &ScrobblePage,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    for record in &page.records {
        report.record(store.insert_if_absent(record).await?);
    }
    Ok(())
}
