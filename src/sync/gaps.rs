//! Gap detection over the stored timeline and targeted backfill.
//!
//! A gap is a silent stretch between two adjacent stored scrobbles that is
//! longer than the threshold. Gaps are derived on demand and never stored.

use std::fmt;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{fetch_page, store_page, StopReason, SyncError, SyncReport};
use crate::lastfm::{PageRequest, ScrobbleSource};
use crate::retry::RetryConfig;
use crate::state::{ScrobbleRecord, ScrobbleStore, StateError};

/// Suspicious interval bracketed by two stored scrobbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRange {
    /// Timestamp of the older bracketing record.
    pub start: i64,
    /// Timestamp of the newer bracketing record.
    pub end: i64,
}

impl GapRange {
    pub fn seconds(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for GapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {} ({})",
            format_timestamp(self.start),
            format_timestamp(self.end),
            format_span(self.seconds())
        )
    }
}

fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => ts.to_string(),
    }
}

fn format_span(secs: i64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

/// Flag every delta strictly greater than `threshold_secs` between
/// adjacent records. `records` must be sorted oldest first.
pub fn detect_gaps(records: &[ScrobbleRecord], threshold_secs: i64) -> Vec<GapRange> {
    records
        .windows(2)
        .filter(|pair| pair[1].timestamp - pair[0].timestamp > threshold_secs)
        .map(|pair| GapRange {
            start: pair[0].timestamp,
            end: pair[1].timestamp,
        })
        .collect()
}

/// Gaps among the records stored in `[window_start, window_end]`.
pub async fn find_gaps(
    store: &dyn ScrobbleStore,
    window_start: i64,
    window_end: i64,
    threshold_secs: i64,
) -> Result<Vec<GapRange>, StateError> {
    let records = store.records_in_range(window_start, window_end).await?;
    let gaps = detect_gaps(&records, threshold_secs);
    debug!(
        records = records.len(),
        gaps = gaps.len(),
        window_start,
        window_end,
        "Scanned for gaps"
    );
    Ok(gaps)
}

/// What backfilling one gap achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapFix {
    pub gap: GapRange,
    /// Records the upstream returned for the range, bracketing records included.
    pub fetched: u64,
    pub inserted: u64,
    /// Sub-ranges still above the threshold after the backfill.
    pub unresolved: Vec<GapRange>,
}

#[derive(Debug, Clone, Copy)]
pub struct GapFixOptions {
    pub threshold_secs: i64,
    pub retry: RetryConfig,
}

/// Fetch every page of each gap's range, insert what comes back, and
/// re-scan the range.
///
/// Ranges that stay silent are reported as unresolved, not escalated.
/// A range whose bracketing records are not both stored is skipped.
/// Cancellation is checked between pages; a gap interrupted midway is left
/// out of the result.
pub async fn fix_gaps(
    source: &dyn ScrobbleSource,
    store: &dyn ScrobbleStore,
    gaps: &[GapRange],
    options: &GapFixOptions,
    cancel: &CancellationToken,
    report: &mut SyncReport,
) -> Result<Vec<GapFix>, SyncError> {
    let mut fixes = Vec::with_capacity(gaps.len());
    report.frontier_before = store.max_timestamp().await?;
    report.frontier_after = report.frontier_before;
    report.stop = StopReason::EndOfHistory;

    'gaps: for gap in gaps {
        if !(store.exists_at(gap.start).await? && store.exists_at(gap.end).await?) {
            warn!(gap = %gap, "Skipping gap not bracketed by stored scrobbles");
            continue;
        }
        let inserted_before = report.inserted;
        let mut fetched = 0u64;
        let mut page_number = 1u32;

        loop {
            if cancel.is_cancelled() {
                report.stop = StopReason::Cancelled;
                break 'gaps;
            }
            let request = PageRequest::in_range(page_number, gap.start, gap.end);
            let Some(page) = fetch_page(source, request, &options.retry, cancel).await? else {
                report.stop = StopReason::Cancelled;
                break 'gaps;
            };
            report.pages_fetched += 1;
            fetched += page.records.len() as u64;
            store_page(store, &page, report).await?;

            if !page.has_more {
                break;
            }
            page_number += 1;
        }

        let unresolved = find_gaps(store, gap.start, gap.end, options.threshold_secs).await?;
        let fix = GapFix {
            gap: *gap,
            fetched,
            inserted: report.inserted - inserted_before,
            unresolved,
        };
        if fix.unresolved.is_empty() {
            info!(gap = %fix.gap, inserted = fix.inserted, "Gap filled");
        } else {
            warn!(
                gap = %fix.gap,
                inserted = fix.inserted,
                unresolved = fix.unresolved.len(),
                "Gap still has silent ranges after backfill"
            );
        }
        fixes.push(fix);
    }

    report.frontier_after = store.max_timestamp().await?;
    Ok(fixes)
}
