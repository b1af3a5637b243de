//! Periodic driver for the `watch` command.
//!
//! A single cooperative loop keeps one slot per job with its next due
//! instant, sleeps until the earliest one (or cancellation), runs it, and
//! reschedules it. Job failures are logged and counted; they never stop the
//! loop.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sync::{SyncError, SyncReport, SyncService};
use crate::types::SyncMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Incremental,
    Thorough,
    /// Gap check over the trailing window, then backfill.
    GapFix { window_secs: i64 },
}

impl Job {
    pub fn mode(&self) -> SyncMode {
        match self {
            Self::Incremental => SyncMode::Incremental,
            Self::Thorough => SyncMode::Thorough,
            Self::GapFix { .. } => SyncMode::GapFix,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode().as_str())
    }
}

/// Longest cadence a job may have.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The instant one period after `now`, with the period clamped to
/// [`MAX_INTERVAL`] so the deadline never overflows.
fn due_after(now: Instant, every: Duration) -> Instant {
    now + every.min(MAX_INTERVAL)
}

/// Job cadences for the watch loop.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub incremental_every: Duration,
    pub thorough_every: Duration,
    pub gaps_every: Duration,
    /// How far back each scheduled gap check looks.
    pub gap_window: Duration,
    /// Consecutive failures of one job before the monitor is alerted.
    pub alert_after: u32,
    /// Keepalive cadence, also honoured while a job runs.
    pub heartbeat: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        const DAY: u64 = 24 * 60 * 60;
        Self {
            incremental_every: Duration::from_secs(60 * 60),
            thorough_every: Duration::from_secs(7 * DAY),
            gaps_every: Duration::from_secs(7 * DAY),
            gap_window: Duration::from_secs(7 * DAY),
            alert_after: 3,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Executes one scheduled job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: Job, cancel: &CancellationToken) -> Result<SyncReport, SyncError>;
}

#[async_trait]
impl JobRunner for SyncService {
    async fn run_job(&self, job: Job, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        match job {
            Job::Incremental => self.incremental(None, cancel).await,
            Job::Thorough => self.thorough(None, cancel).await,
            Job::GapFix { window_secs } => {
                let now = Utc::now().timestamp();
                let threshold = self.settings().gap_threshold_secs;
                let summary = self
                    .fix_gaps(now - window_secs, now, threshold, cancel)
                    .await?;
                if summary.unresolved() > 0 {
                    warn!(
                        gaps = summary.detected.len(),
                        unresolved = summary.unresolved(),
                        "Some gaps could not be filled"
                    );
                }
                Ok(summary.report)
            }
        }
    }
}

/// Where the scheduler reports liveness and repeated failures.
pub trait MonitorSink: Send + Sync {
    fn ready(&self);
    fn heartbeat(&self);
    fn status(&self, message: &str);
    fn alert(&self, job: Job, consecutive_failures: u32, error: &SyncError);
    fn stopping(&self);
}

#[derive(Debug)]
struct JobSlot {
    job: Job,
    every: Duration,
    next_due: Instant,
    last_run: Option<Instant>,
    consecutive_failures: u32,
}

pub struct Scheduler<'a> {
    runner: &'a dyn JobRunner,
    monitor: &'a dyn MonitorSink,
    schedule: Schedule,
    slots: Vec<JobSlot>,
}

impl<'a> Scheduler<'a> {
    /// Incremental is due immediately; the other jobs after one period.
    pub fn new(runner: &'a dyn JobRunner, monitor: &'a dyn MonitorSink, schedule: Schedule) -> Self {
        let now = Instant::now();
        let window_secs = i64::try_from(schedule.gap_window.as_secs()).unwrap_or(i64::MAX);
        let slots = vec![
            JobSlot {
                job: Job::Incremental,
                every: schedule.incremental_every,
                next_due: now,
                last_run: None,
                consecutive_failures: 0,
            },
            JobSlot {
                job: Job::Thorough,
                every: schedule.thorough_every,
                next_due: due_after(now, schedule.thorough_every),
                last_run: None,
                consecutive_failures: 0,
            },
            JobSlot {
                job: Job::GapFix { window_secs },
                every: schedule.gaps_every,
                next_due: due_after(now, schedule.gaps_every),
                last_run: None,
                consecutive_failures: 0,
            },
        ];
        Self {
            runner,
            monitor,
            schedule,
            slots,
        }
    }

    fn next_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.next_due)
            .map(|(idx, _)| idx)
    }

    /// Run until `cancel` fires. A job in flight winds down at its next
    /// cancellation point before this returns.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        self.monitor.ready();
        info!(
            incremental_mins = self.schedule.incremental_every.as_secs() / 60,
            thorough_hours = self.schedule.thorough_every.as_secs() / 3600,
            gaps_hours = self.schedule.gaps_every.as_secs() / 3600,
            "Scheduler started"
        );

        let mut heartbeat = tokio::time::interval(self.schedule.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while let Some(idx) = self.next_slot() {
            let due = self.slots[idx].next_due;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    self.monitor.heartbeat();
                    continue;
                }
                _ = tokio::time::sleep_until(due) => {}
            }

            self.run_slot(idx, &mut heartbeat, cancel).await;
            if cancel.is_cancelled() {
                break;
            }
        }

        info!("Scheduler stopping");
        self.monitor.stopping();
    }

    async fn run_slot(&mut self, idx: usize, heartbeat: &mut Interval, cancel: &CancellationToken) {
        let job = self.slots[idx].job;
        let since_last_secs = self.slots[idx].last_run.map(|t| t.elapsed().as_secs());
        let started = Instant::now();
        info!(%job, since_last_secs = ?since_last_secs, "Running scheduled job");
        self.monitor.status(&format!("running {job}"));

        let runner = self.runner;
        let run = runner.run_job(job, cancel);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = heartbeat.tick() => self.monitor.heartbeat(),
            }
        };

        let slot = &mut self.slots[idx];
        slot.last_run = Some(started);
        slot.next_due = due_after(Instant::now(), slot.every);

        match result {
            Ok(report) => {
                slot.consecutive_failures = 0;
                info!(
                    %job,
                    inserted = report.inserted,
                    pages = report.pages_fetched,
                    stop = %report.stop,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Scheduled job finished"
                );
                self.monitor.status(&format!(
                    "{job}: {} new, {}",
                    report.inserted, report.stop
                ));
            }
            Err(e) => {
                slot.consecutive_failures += 1;
                let failures = slot.consecutive_failures;
                error!(%job, failures, fatal = e.is_fatal(), error = %e, "Scheduled job failed");
                if failures >= self.schedule.alert_after {
                    self.monitor.alert(job, failures, &e);
                }
            }
        }
    }
}
