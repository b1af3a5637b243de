use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "lytter-rs",
    version,
    about = "Keep a local, deduplicated copy of a Last.fm listening history"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite database holding the scrobbles
    #[arg(long, global = true, env = "LYTTER_DB", default_value = "~/.lytter-rs/music.db")]
    pub db: String,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch new scrobbles (incremental unless --thorough or --full)
    Sync(SyncArgs),
    /// Summarize what the database holds and how fresh it is
    Status(StatusArgs),
    /// Look for silent stretches in recent history and optionally backfill them
    Gaps(GapsArgs),
    /// Run the scheduler until interrupted
    Watch(WatchArgs),
}

/// Upstream credentials.
#[derive(Args, Clone)]
pub struct ApiArgs {
    /// Last.fm API key
    #[arg(long, env = "LASTFM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Last.fm account whose history is synced
    #[arg(long, env = "LASTFM_USER")]
    pub user: Option<String>,
}

impl std::fmt::Debug for ApiArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiArgs")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .finish()
    }
}

/// Sync tuning shared by the network commands.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Stop after this many consecutive already-stored scrobbles
    #[arg(long, env = "LYTTER_CONSECUTIVE_THRESHOLD", default_value_t = 50)]
    pub consecutive_threshold: u32,

    /// Page budget of an incremental sync
    #[arg(long, env = "LYTTER_MAX_PAGES", default_value_t = 5)]
    pub max_pages: u32,

    /// Page budget of a thorough sync
    #[arg(long, env = "LYTTER_THOROUGH_PAGES", default_value_t = 20)]
    pub thorough_pages: u32,

    /// Retries per page for transient failures
    #[arg(long, env = "LYTTER_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    /// Base backoff delay in seconds
    #[arg(long, env = "LYTTER_RETRY_DELAY", default_value_t = 5)]
    pub retry_delay: u64,

    /// Silences longer than this many seconds count as gaps
    #[arg(long, env = "LYTTER_GAP_THRESHOLD", default_value_t = 3600)]
    pub gap_threshold: i64,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Override the page budget for this run
    #[arg(long)]
    pub pages: Option<u32>,

    /// Use the larger thorough page budget
    #[arg(long, conflicts_with = "full")]
    pub thorough: bool,

    /// Re-fetch the entire history
    #[arg(long)]
    pub full: bool,

    /// Skip the confirmation prompt of a full sync
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Warn when the newest scrobble is older than this many hours
    #[arg(long, default_value_t = 1)]
    pub stale_after_hours: u64,
}

#[derive(Args, Debug)]
pub struct GapsArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// How many hours back from now to scan
    #[arg(long, default_value_t = 24)]
    pub hours: u64,

    /// Backfill the gaps found (default is a report-only dry run)
    #[arg(long)]
    pub fix: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Minutes between incremental syncs
    #[arg(long, default_value_t = 60)]
    pub incremental_every: u64,

    /// Hours between thorough syncs
    #[arg(long, default_value_t = 168)]
    pub thorough_every: u64,

    /// Hours between gap checks with backfill
    #[arg(long, default_value_t = 168)]
    pub gaps_every: u64,

    /// Hours of history each scheduled gap check covers
    #[arg(long, default_value_t = 168)]
    pub gaps_window: u64,

    /// Consecutive failures of one job before raising an alert
    #[arg(long, default_value_t = 3)]
    pub alert_after: u32,

    /// Send sd_notify READY/WATCHDOG/STATUS/STOPPING messages
    #[arg(long)]
    pub notify_systemd: bool,
}
