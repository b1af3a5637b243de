use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{ApiArgs, TuningArgs, WatchArgs};
use crate::lastfm::Credentials;
use crate::retry::RetryConfig;
use crate::scheduler::{Schedule, MAX_INTERVAL};
use crate::sync::SyncSettings;

/// Application configuration, built once from CLI flags and environment.
#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    /// `None` when the command did not take credentials or none were given.
    pub credentials: Option<Credentials>,
    pub sync: SyncSettings,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Config {
    /// Configuration for commands that only read the database.
    pub fn local(db: &str) -> Self {
        Self {
            db_path: expand_tilde(db),
            credentials: None,
            sync: SyncSettings::default(),
        }
    }

    /// Configuration for commands that talk to the upstream.
    pub fn remote(db: &str, api: &ApiArgs, tuning: &TuningArgs) -> anyhow::Result<Self> {
        if tuning.consecutive_threshold == 0 {
            anyhow::bail!("--consecutive-threshold must be at least 1");
        }
        if tuning.max_pages == 0 || tuning.thorough_pages == 0 {
            anyhow::bail!("Page budgets (--max-pages, --thorough-pages) must be at least 1");
        }
        if tuning.gap_threshold <= 0 {
            anyhow::bail!("--gap-threshold must be a positive number of seconds");
        }

        let credentials = match (non_empty(api.api_key.as_ref()), non_empty(api.user.as_ref())) {
            (Some(api_key), Some(user)) => Some(Credentials { api_key, user }),
            _ => None,
        };

        Ok(Self {
            db_path: expand_tilde(db),
            credentials,
            sync: SyncSettings {
                consecutive_threshold: tuning.consecutive_threshold,
                max_pages: tuning.max_pages,
                thorough_pages: tuning.thorough_pages,
                gap_threshold_secs: tuning.gap_threshold,
                retry: RetryConfig {
                    max_retries: tuning.max_retries,
                    base_delay_secs: tuning.retry_delay,
                    ..RetryConfig::default()
                },
            },
        })
    }

    pub fn require_credentials(&self) -> anyhow::Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "Last.fm credentials missing: set LASTFM_API_KEY and LASTFM_USER \
                 (environment or .env) or pass --api-key and --user"
            )
        })
    }
}

/// Scheduler cadences from the `watch` flags.
pub fn schedule_from_args(args: &WatchArgs) -> anyhow::Result<Schedule> {
    if args.incremental_every == 0 || args.thorough_every == 0 || args.gaps_every == 0 {
        anyhow::bail!("Watch intervals must be greater than zero");
    }
    if args.gaps_window == 0 {
        anyhow::bail!("--gaps-window must be at least one hour");
    }
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    let interval = |flag: &str, value: u64, unit: u64| -> anyhow::Result<Duration> {
        let every = Duration::from_secs(value.saturating_mul(unit));
        if every > MAX_INTERVAL {
            anyhow::bail!("{flag} must not exceed {} days", MAX_INTERVAL.as_secs() / (24 * HOUR));
        }
        Ok(every)
    };
    Ok(Schedule {
        incremental_every: interval("--incremental-every", args.incremental_every, MINUTE)?,
        thorough_every: interval("--thorough-every", args.thorough_every, HOUR)?,
        gaps_every: interval("--gaps-every", args.gaps_every, HOUR)?,
        gap_window: interval("--gaps-window", args.gaps_window, HOUR)?,
        alert_after: args.alert_after.max(1),
        ..Schedule::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(key: Option<&str>, user: Option<&str>) -> ApiArgs {
        ApiArgs {
            api_key: key.map(String::from),
            user: user.map(String::from),
        }
    }

    fn tuning() -> TuningArgs {
        TuningArgs {
            consecutive_threshold: 50,
            max_pages: 5,
            thorough_pages: 20,
            max_retries: 2,
            retry_delay: 5,
            gap_threshold: 3600,
        }
    }

    fn watch_args() -> WatchArgs {
        WatchArgs {
            api: api(None, None),
            tuning: tuning(),
            incremental_every: 60,
            thorough_every: 168,
            gaps_every: 168,
            gaps_window: 168,
            alert_after: 3,
            notify_systemd: false,
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/.lytter-rs/music.db");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join(".lytter-rs/music.db"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/var/lib/music.db"), PathBuf::from("/var/lib/music.db"));
        assert_eq!(expand_tilde("music.db"), PathBuf::from("music.db"));
    }

    #[test]
    fn test_remote_maps_tuning() {
        let mut t = tuning();
        t.max_retries = 4;
        t.retry_delay = 1;
        let config = Config::remote("music.db", &api(Some("k"), Some("u")), &t).unwrap();
        assert_eq!(config.sync.max_pages, 5);
        assert_eq!(config.sync.thorough_pages, 20);
        assert_eq!(config.sync.retry.max_retries, 4);
        assert_eq!(config.sync.retry.base_delay_secs, 1);
        assert_eq!(config.sync.retry.max_rate_limit_waits, 10);
        assert_eq!(config.require_credentials().unwrap().user, "u");
    }

    #[test]
    fn test_missing_or_blank_credentials() {
        let config = Config::remote("music.db", &api(Some("k"), None), &tuning()).unwrap();
        assert!(config.require_credentials().is_err());

        let config = Config::remote("music.db", &api(Some("  "), Some("u")), &tuning()).unwrap();
        let err = config.require_credentials().unwrap_err().to_string();
        assert!(err.contains("LASTFM_API_KEY"));
    }

    #[test]
    fn test_rejects_zero_budgets() {
        let mut t = tuning();
        t.max_pages = 0;
        assert!(Config::remote("music.db", &api(None, None), &t).is_err());

        let mut t = tuning();
        t.consecutive_threshold = 0;
        assert!(Config::remote("music.db", &api(None, None), &t).is_err());

        let mut t = tuning();
        t.gap_threshold = 0;
        assert!(Config::remote("music.db", &api(None, None), &t).is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = Config::remote("music.db", &api(Some("s3cret"), Some("u")), &tuning()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn test_schedule_units() {
        let schedule = schedule_from_args(&watch_args()).unwrap();
        assert_eq!(schedule.incremental_every, Duration::from_secs(3600));
        assert_eq!(schedule.thorough_every, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(schedule.gap_window, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(schedule.alert_after, 3);
    }

    #[test]
    fn test_schedule_rejects_oversized_intervals() {
        let mut args = watch_args();
        args.thorough_every = u64::MAX / 3600;
        let err = schedule_from_args(&args).unwrap_err().to_string();
        assert!(err.contains("--thorough-every"));

        let mut args = watch_args();
        args.gaps_every = 365 * 24 + 1;
        assert!(schedule_from_args(&args).is_err());

        let mut args = watch_args();
        args.gaps_window = u64::MAX;
        assert!(schedule_from_args(&args).is_err());

        let mut args = watch_args();
        args.thorough_every = 365 * 24;
        assert!(schedule_from_args(&args).is_ok());
    }

    #[test]
    fn test_schedule_rejects_zero_interval() {
        let mut args = watch_args();
        args.incremental_every = 0;
        assert!(schedule_from_args(&args).is_err());
    }
}
