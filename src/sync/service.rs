//! Entry point for every sync run, from the CLI or the scheduler.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::full::{run_full, FullOptions};
use super::gaps::{find_gaps, fix_gaps, GapFixOptions};
use super::incremental::{run_incremental, IncrementalOptions};
use super::{GapFix, GapRange, SyncError, SyncReport, SyncSettings};
use crate::lastfm::ScrobbleSource;
use crate::state::ScrobbleStore;
use crate::types::SyncMode;

/// Result of a gap check followed by a backfill.
#[derive(Debug, Clone)]
pub struct GapFixSummary {
    pub detected: Vec<GapRange>,
    pub fixes: Vec<GapFix>,
    pub report: SyncReport,
}

impl GapFixSummary {
    pub fn unresolved(&self) -> usize {
        self.fixes.iter().map(|f| f.unresolved.len()).sum()
    }
}

/// Owns the source, the store and the run lock. At most one run of any
/// mode executes at a time within the process, and each run leaves a row
/// in `sync_runs`.
pub struct SyncService {
    source: Arc<dyn ScrobbleSource>,
    store: Arc<dyn ScrobbleStore>,
    settings: SyncSettings,
    run_lock: Arc<Mutex<()>>,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn ScrobbleSource>,
        store: Arc<dyn ScrobbleStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    async fn acquire(&self) -> MutexGuard<'_, ()> {
        match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Another sync run is in progress, waiting for it to finish");
                self.run_lock.lock().await
            }
        }
    }

    async fn finish(&self, run_id: i64, report: &SyncReport, error: Option<&SyncError>) {
        if let Err(e) = self
            .store
            .complete_sync_run(run_id, &report.run_stats(error))
            .await
        {
            warn!(run_id, error = %e, "Failed to record sync run");
        }
    }

    /// Incremental run; `pages` overrides the configured page budget.
    pub async fn incremental(
        &self,
        pages: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let max_pages = pages.unwrap_or(self.settings.max_pages);
        self.run_incremental_mode(SyncMode::Incremental, max_pages, cancel)
            .await
    }

    /// Incremental algorithm with the larger thorough page budget.
    pub async fn thorough(
        &self,
        pages: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let max_pages = pages.unwrap_or(self.settings.thorough_pages);
        self.run_incremental_mode(SyncMode::Thorough, max_pages, cancel)
            .await
    }

    async fn run_incremental_mode(
        &self,
        mode: SyncMode,
        max_pages: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let options = IncrementalOptions {
            consecutive_threshold: self.settings.consecutive_threshold,
            max_pages,
            retry: self.settings.retry,
        };

        let _guard = self.acquire().await;
        let run_id = self.store.start_sync_run(mode).await?;
        let mut report = SyncReport::new(mode);
        let result = run_incremental(
            self.source.as_ref(),
            self.store.as_ref(),
            &options,
            cancel,
            &mut report,
        )
        .await;
        self.finish(run_id, &report, result.as_ref().err()).await;
        result.map(|()| report)
    }

    /// Walk the whole history, optionally capped at `max_pages`.
    pub async fn full(
        &self,
        max_pages: Option<u32>,
        show_progress: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let options = FullOptions {
            max_pages,
            retry: self.settings.retry,
            show_progress,
        };

        let _guard = self.acquire().await;
        let run_id = self.store.start_sync_run(SyncMode::Full).await?;
        let mut report = SyncReport::new(SyncMode::Full);
        let result = run_full(
            self.source.as_ref(),
            self.store.as_ref(),
            &options,
            cancel,
            &mut report,
        )
        .await;
        self.finish(run_id, &report, result.as_ref().err()).await;
        result.map(|()| report)
    }

    /// Scan `[window_start, window_end]` and backfill every gap found.
    pub async fn fix_gaps(
        &self,
        window_start: i64,
        window_end: i64,
        threshold_secs: i64,
        cancel: &CancellationToken,
    ) -> Result<GapFixSummary, SyncError> {
        let options = GapFixOptions {
            threshold_secs,
            retry: self.settings.retry,
        };

        let _guard = self.acquire().await;
        let detected =
            find_gaps(self.store.as_ref(), window_start, window_end, threshold_secs).await?;
        info!(gaps = detected.len(), "Backfilling gaps");

        let run_id = self.store.start_sync_run(SyncMode::GapFix).await?;
        let mut report = SyncReport::new(SyncMode::GapFix);
        let result = fix_gaps(
            self.source.as_ref(),
            self.store.as_ref(),
            &detected,
            &options,
            cancel,
            &mut report,
        )
        .await;
        self.finish(run_id, &report, result.as_ref().err()).await;
        let fixes = result?;
        Ok(GapFixSummary {
            detected,
            fixes,
            report,
        })
    }
}
