//! Types for the record store.

use chrono::{DateTime, TimeZone, Utc};

use crate::types::SyncMode;

/// One recorded play event.
///
/// `timestamp` (unix seconds) is the identity of a scrobble; every other field
/// is payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobbleRecord {
    pub artist: String,
    pub artist_external_id: Option<String>,
    pub album: Option<String>,
    pub album_external_id: Option<String>,
    pub track: String,
    pub track_external_id: Option<String>,
    pub timestamp: i64,
}

impl ScrobbleRecord {
    /// The scrobble time as a UTC datetime, if representable.
    pub fn played_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }
}

/// Result of an idempotent insert.
///
/// `AlreadyExists` is the expected steady-state signal near the frontier,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Aggregate view of the store used by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: u64,
    pub distinct_artists: u64,
    pub distinct_tracks: u64,
    pub newest: Option<DateTime<Utc>>,
    pub oldest: Option<DateTime<Utc>>,
}

impl StoreSummary {
    /// How far the newest stored scrobble lags behind `now`.
    pub fn frontier_lag(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.newest.map(|newest| now - newest)
    }

    /// Whole days between the oldest and newest scrobble.
    pub fn span_days(&self) -> Option<i64> {
        match (self.oldest, self.newest) {
            (Some(oldest), Some(newest)) => Some((newest - oldest).num_days()),
            _ => None,
        }
    }

    /// Average scrobbles per day over the stored span (at least one day).
    pub fn average_per_day(&self) -> Option<f64> {
        let days = self.span_days()?.max(1);
        Some(self.total as f64 / days as f64)
    }
}

/// Counters accumulated by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub pages_fetched: u64,
    pub inserted: u64,
    pub already_present: u64,
    pub interrupted: bool,
    pub error: Option<String>,
}

/// A row of the `sync_runs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunRecord {
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SyncRunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn frontier_lag_is_none_for_empty_store() {
        let summary = StoreSummary::default();
        assert!(summary.frontier_lag(Utc::now()).is_none());
        assert!(summary.average_per_day().is_none());
    }

    #[test]
    fn frontier_lag_measures_from_newest() {
        let summary = StoreSummary {
            newest: Some(at(10_000)),
            ..Default::default()
        };
        let lag = summary.frontier_lag(at(13_600)).unwrap();
        assert_eq!(lag.num_seconds(), 3_600);
    }

    #[test]
    fn average_per_day_uses_at_least_one_day() {
        let summary = StoreSummary {
            total: 30,
            oldest: Some(at(0)),
            newest: Some(at(3_600)),
            ..Default::default()
        };
        assert_eq!(summary.span_days(), Some(0));
        assert_eq!(summary.average_per_day(), Some(30.0));
    }

    #[test]
    fn average_per_day_over_span() {
        let summary = StoreSummary {
            total: 100,
            oldest: Some(at(0)),
            newest: Some(at(10 * 86_400)),
            ..Default::default()
        };
        assert_eq!(summary.span_days(), Some(10));
        assert_eq!(summary.average_per_day(), Some(10.0));
    }

    #[test]
    fn played_at_converts_unix_seconds() {
        let record = ScrobbleRecord {
            artist: "a".into(),
            artist_external_id: None,
            album: None,
            album_external_id: None,
            track: "t".into(),
            track_external_id: None,
            timestamp: 86_400,
        };
        assert_eq!(record.played_at(), Some(at(86_400)));
    }
}
