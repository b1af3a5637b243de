//! Full sync: walk the entire upstream history, inserting idempotently.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{fetch_page, store_page, StopReason, SyncError, SyncReport};
use crate::lastfm::{PageRequest, ScrobbleSource};
use crate::retry::RetryConfig;
use crate::state::ScrobbleStore;

#[derive(Debug, Clone, Copy)]
pub struct FullOptions {
    /// Stop after this many pages. `None` walks to the end of the history.
    pub max_pages: Option<u32>,
    pub retry: RetryConfig,
    pub show_progress: bool,
}

/// A page progress bar, hidden when disabled or stderr is not a terminal.
///
/// The length is unknown until the first page reports `total_pages`.
fn create_progress_bar(show_progress: bool) -> ProgressBar {
    if !show_progress || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] page {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Fetch every page from page 1 until the upstream reports no more pages,
/// the optional page cap is hit, or `cancel` fires. No early stop on
/// already-stored records.
pub async fn run_full(
    source: &dyn ScrobbleSource,
    store: &dyn ScrobbleStore,
    options: &FullOptions,
    cancel: &CancellationToken,
    report: &mut SyncReport,
) -> Result<(), SyncError> {
    report.frontier_before = store.max_timestamp().await?;
    report.frontier_after = report.frontier_before;
    info!(max_pages = ?options.max_pages, "Starting full sync");

    let pb = create_progress_bar(options.show_progress);
    let mut page_number = 1u32;

    let outcome = loop {
        if options.max_pages.is_some_and(|cap| page_number > cap) {
            break Ok(StopReason::PageBudget);
        }
        if cancel.is_cancelled() {
            break Ok(StopReason::Cancelled);
        }

        let page =
            match fetch_page(source, PageRequest::page(page_number), &options.retry, cancel).await
            {
                Ok(Some(page)) => page,
                Ok(None) => break Ok(StopReason::Cancelled),
                Err(e) => break Err(e),
            };
        report.pages_fetched += 1;

        let total = match options.max_pages {
            Some(cap) => page.total_pages.min(cap),
            None => page.total_pages,
        };
        pb.set_length(u64::from(total));

        if let Err(e) = store_page(store, &page, report).await {
            break Err(e);
        }
        pb.set_position(u64::from(page_number));
        pb.set_message(format!("{} new", report.inserted));
        debug!(
            page = page_number,
            total_pages = page.total_pages,
            reached = ?page.records.last().and_then(|r| r.played_at()),
            inserted = report.inserted,
            "Processed page"
        );

        if !page.has_more {
            break Ok(StopReason::EndOfHistory);
        }
        page_number += 1;
    };
    pb.finish_and_clear();

    report.stop = outcome?;
    report.frontier_after = store.max_timestamp().await?;
    info!(
        pages = report.pages_fetched,
        inserted = report.inserted,
        already_present = report.already_present,
        stop = %report.stop,
        "Full sync finished"
    );
    Ok(())
}
