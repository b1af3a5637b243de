//! lytter-rs: keeps a local, deduplicated copy of a Last.fm listening history.
//!
//! Scrobbles are pulled page by page from `user.getRecentTracks` and stored
//! in SQLite keyed by their timestamp. Incremental runs stop once they re-meet
//! the stored frontier, full runs walk the whole history, and the gap pass
//! backfills suspicious silent ranges. `watch` drives all of them on a
//! schedule.

#![warn(clippy::all)]

mod cli;
mod config;
mod lastfm;
pub mod retry;
mod scheduler;
mod shutdown;
mod state;
mod sync;
mod systemd;
#[cfg(test)]
mod test_support;
mod types;

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use lastfm::LastFmClient;
use state::{ScrobbleStore, SqliteScrobbleStore};
use sync::{SyncReport, SyncService};

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(|dt| format_time(&dt))
        .unwrap_or_else(|| "-".to_string())
}

/// Format a duration as "Xd Yh", "Xh Ym" or "Xm".
fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes().max(0);
    let (days, hours, mins) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins:02}m")
    } else {
        format!("{mins}m")
    }
}

fn stale_threshold(hours: u64) -> anyhow::Result<chrono::Duration> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| anyhow::anyhow!("--stale-after-hours {hours} is out of range"))
}

async fn open_store(path: &Path) -> anyhow::Result<Arc<SqliteScrobbleStore>> {
    let store = SqliteScrobbleStore::open(path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn build_service(config: &Config) -> anyhow::Result<SyncService> {
    let credentials = config.require_credentials()?.clone();
    let client = LastFmClient::new(credentials).context("Failed to build HTTP client")?;
    let store = open_store(&config.db_path).await?;
    tracing::debug!(db = %store.path().display(), "Database ready");
    Ok(SyncService::new(Arc::new(client), store, config.sync))
}

fn print_report(report: &SyncReport) {
    println!("Sync ({}) finished: {}", report.mode, report.stop);
    println!("  Pages fetched:   {}", report.pages_fetched);
    println!("  New scrobbles:   {}", report.inserted);
    println!("  Already stored:  {}", report.already_present);
    println!(
        "  Newest stored:   {} -> {}",
        format_timestamp(report.frontier_before),
        format_timestamp(report.frontier_after)
    );
}

/// Ask before a full sync. Refuses when there is nobody to ask.
fn confirm_full_sync() -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("A full sync re-fetches the entire history; pass --yes to run it non-interactively");
    }
    print!("A full sync re-fetches the entire history and can take a long time. Continue? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    tokio::task::block_in_place(|| std::io::stdin().lock().read_line(&mut answer))?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Run the sync command.
async fn run_sync(db: &str, args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::remote(db, &args.api, &args.tuning)?;
    if args.pages == Some(0) {
        anyhow::bail!("--pages must be at least 1");
    }
    config.require_credentials()?;

    if args.full && !args.yes && !confirm_full_sync()? {
        println!("Full sync cancelled.");
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler()?;
    let service = build_service(&config).await?;

    let result = if args.full {
        service
            .full(args.pages, !args.no_progress_bar, &shutdown_token)
            .await
    } else if args.thorough {
        service.thorough(args.pages, &shutdown_token).await
    } else {
        service.incremental(args.pages, &shutdown_token).await
    };

    let report = result.context("Sync failed")?;
    print_report(&report);
    Ok(())
}

/// Run the status command.
async fn run_status(db: &str, args: cli::StatusArgs) -> anyhow::Result<()> {
    let config = Config::local(db);

    if !config.db_path.exists() {
        println!("No database found at {}", config.db_path.display());
        println!("Run `lytter-rs sync` first to create it.");
        return Ok(());
    }

    let stale_after = stale_threshold(args.stale_after_hours)?;
    let store = open_store(&config.db_path).await?;
    let summary = store.summary().await?;
    let runs = store.last_runs().await?;
    let now = Utc::now();

    println!("Database: {}", config.db_path.display());
    println!();
    println!("Scrobbles:");
    println!("  Total:            {}", summary.total);
    println!("  Distinct artists: {}", summary.distinct_artists);
    println!("  Distinct tracks:  {}", summary.distinct_tracks);

    if let (Some(oldest), Some(newest)) = (&summary.oldest, &summary.newest) {
        println!("  Oldest:           {}", format_time(oldest));
        println!("  Newest:           {}", format_time(newest));
    }
    if let Some(days) = summary.span_days() {
        println!("  Span:             {days} days");
    }
    if let Some(avg) = summary.average_per_day() {
        println!("  Average per day:  {avg:.1}");
    }

    println!();
    match summary.frontier_lag(now) {
        Some(lag) => {
            if lag > stale_after {
                println!(
                    "Freshness: STALE, newest scrobble is {} old (threshold {}h)",
                    format_age(lag),
                    args.stale_after_hours
                );
            } else {
                println!("Freshness: OK, newest scrobble is {} old", format_age(lag));
            }
        }
        None => println!("Freshness: no scrobbles stored yet"),
    }

    if !runs.is_empty() {
        println!();
        println!("Last runs:");
        for run in &runs {
            let outcome = if let Some(error) = &run.stats.error {
                format!("failed: {error}")
            } else if run.stats.interrupted {
                "interrupted".to_string()
            } else if run.completed_at.is_none() {
                "did not finish".to_string()
            } else {
                "completed".to_string()
            };
            println!(
                "  {:<12} {}  {} pages, {} new, {} already stored ({})",
                run.mode.as_str(),
                format_time(&run.started_at),
                run.stats.pages_fetched,
                run.stats.inserted,
                run.stats.already_present,
                outcome
            );
        }
    }

    Ok(())
}

/// Run the gaps command.
async fn run_gaps(db: &str, args: cli::GapsArgs) -> anyhow::Result<()> {
    let config = Config::remote(db, &args.api, &args.tuning)?;
    if args.hours == 0 {
        anyhow::bail!("--hours must be at least 1");
    }
    let threshold = config.sync.gap_threshold_secs;
    let window_end = Utc::now().timestamp();
    let window_start =
        window_end.saturating_sub(i64::try_from(args.hours.saturating_mul(3600)).unwrap_or(i64::MAX));

    if !args.fix {
        if !config.db_path.exists() {
            println!("No database found at {}", config.db_path.display());
            return Ok(());
        }
        let store = open_store(&config.db_path).await?;
        let gaps = sync::gaps::find_gaps(store.as_ref(), window_start, window_end, threshold).await?;
        println!(
            "Found {} gap(s) longer than {}s in the last {}h (dry run, use --fix to backfill)",
            gaps.len(),
            threshold,
            args.hours
        );
        for gap in &gaps {
            println!("  {gap}");
        }
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler()?;
    let service = build_service(&config).await?;
    let summary = service
        .fix_gaps(window_start, window_end, threshold, &shutdown_token)
        .await
        .context("Gap backfill failed")?;

    println!(
        "Found {} gap(s) longer than {}s in the last {}h",
        summary.detected.len(),
        threshold,
        args.hours
    );
    for fix in &summary.fixes {
        println!(
            "  {}: fetched {}, inserted {}",
            fix.gap, fix.fetched, fix.inserted
        );
        for remaining in &fix.unresolved {
            println!("    still silent: {remaining}");
        }
    }
    if summary.fixes.len() < summary.detected.len() {
        println!(
            "Stopped early ({}); {} gap(s) not processed",
            summary.report.stop,
            summary.detected.len() - summary.fixes.len()
        );
    }
    println!(
        "Inserted {} scrobble(s); {} range(s) unresolved",
        summary.report.inserted,
        summary.unresolved()
    );
    Ok(())
}

/// Run the watch command.
async fn run_watch(db: &str, args: cli::WatchArgs) -> anyhow::Result<()> {
    let config = Config::remote(db, &args.api, &args.tuning)?;
    let schedule = config::schedule_from_args(&args)?;
    let shutdown_token = shutdown::install_signal_handler()?;
    let service = build_service(&config).await?;
    let notifier = systemd::SystemdNotifier::new(args.notify_systemd);

    tracing::info!(db = %config.db_path.display(), "Starting watch mode");
    scheduler::Scheduler::new(&service, &notifier, schedule)
        .run(&shutdown_token)
        .await;
    tracing::info!("Watch mode stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before parsing, so .env values feed clap's env fallbacks.
    let dotenv_path = dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    if let Some(path) = dotenv_path {
        tracing::debug!(path = %path.display(), "Loaded environment from .env");
    }

    match cli.command {
        Command::Sync(args) => run_sync(&cli.db, args).await,
        Command::Status(args) => run_status(&cli.db, args).await,
        Command::Gaps(args) => run_gaps(&cli.db, args).await,
        Command::Watch(args) => run_watch(&cli.db, args).await,
    }
}
