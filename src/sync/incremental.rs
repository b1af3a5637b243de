//! Incremental (and thorough) sync: fetch newest pages until the stored
//! frontier is re-met.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{fetch_page, StopReason, SyncError, SyncReport};
use crate::lastfm::{PageRequest, ScrobbleSource};
use crate::retry::RetryConfig;
use crate::state::{InsertOutcome, ScrobbleStore};

/// Counts consecutive `AlreadyExists` outcomes; any insert resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchStreak {
    run: u32,
    threshold: u32,
}

impl MatchStreak {
    /// A threshold of zero behaves like one.
    pub fn new(threshold: u32) -> Self {
        Self {
            run: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn observe(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::AlreadyExists => self.run = self.run.saturating_add(1),
            InsertOutcome::Inserted => self.run = 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.run >= self.threshold
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IncrementalOptions {
    pub consecutive_threshold: u32,
    pub max_pages: u32,
    pub retry: RetryConfig,
}

/// Fetch pages newest-first, inserting every record, until one of:
/// the streak completes on a record at or behind the frontier read at the
/// start of the run, `max_pages` pages were fetched, the upstream runs out
/// of pages, or `cancel` fires.
///
/// An empty store has no frontier, so only the other three conditions apply.
pub async fn run_incremental(
    source: &dyn ScrobbleSource,
    store: &dyn ScrobbleStore,
    options: &IncrementalOptions,
    cancel: &CancellationToken,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    let frontier = store.max_timestamp().await?;
    report.frontier_before = frontier;
    report.frontier_after = frontier;

    info!(
        mode = %report.mode,
        frontier = ?frontier,
        max_pages = options.max_pages,
        threshold = options.consecutive_threshold,
        "Starting sync"
    );

    let mut streak = MatchStreak::new(options.consecutive_threshold);
    let mut page_number = 1u32;

    report.stop = loop {
        if page_number > options.max_pages {
            break StopReason::PageBudget;
        }
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }

        let Some(page) =
            fetch_page(source, PageRequest::page(page_number), &options.retry, cancel).await?
        else {
            break StopReason::Cancelled;
        };
        report.pages_fetched += 1;

        let mut caught_up = false;
        for record in &page.records {
            let outcome = store.insert_if_absent(record).await?;
            report.record(outcome);
            streak.observe(outcome);
            if streak.is_complete() && frontier.is_some_and(|f| record.timestamp <= f) {
                caught_up = true;
                break;
            }
        }

        debug!(
            page = page_number,
            total_pages = page.total_pages,
            reached = ?page.records.last().and_then(|r| r.played_at()),
            inserted = report.inserted,
            already_present = report.already_present,
            "Processed page"
        );

        if caught_up {
            break StopReason::CaughtUp;
        }
        if !page.has_more {
            break StopReason::EndOfHistory;
        }
        page_number += 1;
    };

    report.frontier_after = store.max_timestamp().await?;
    info!(
        mode = %report.mode,
        pages = report.pages_fetched,
        inserted = report.inserted,
        already_present = report.already_present,
        stop = %report.stop,
        "Sync finished"
    );
    Ok(())
}
