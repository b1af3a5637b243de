//! Record store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::{InsertOutcome, ScrobbleRecord, StoreSummary, SyncRunRecord, SyncRunStats};
use crate::types::SyncMode;

/// Durable keyed collection of scrobbles.
///
/// Object-safe so controllers can share one store as `Arc<dyn ScrobbleStore>`.
/// Records are append-only: nothing here updates or deletes a scrobble.
#[async_trait]
pub trait ScrobbleStore: Send + Sync {
    /// Insert `record` unless a scrobble with the same timestamp is stored.
    ///
    /// Atomic with respect to the timestamp uniqueness invariant: concurrent
    /// callers racing on one timestamp see exactly one `Inserted`.
    async fn insert_if_absent(&self, record: &ScrobbleRecord) -> Result<InsertOutcome, StateError>;

    /// The sync frontier: newest stored timestamp.
    async fn max_timestamp(&self) -> Result<Option<i64>, StateError>;

    async fn min_timestamp(&self) -> Result<Option<i64>, StateError>;

    async fn exists_at(&self, timestamp: i64) -> Result<bool, StateError>;

    /// Records with `start <= timestamp <= end`, oldest first.
    async fn records_in_range(&self, start: i64, end: i64)
        -> Result<Vec<ScrobbleRecord>, StateError>;

    async fn summary(&self) -> Result<StoreSummary, StateError>;

    /// Open a `sync_runs` row and return its ID.
    async fn start_sync_run(&self, mode: SyncMode) -> Result<i64, StateError>;

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError>;

    /// Most recent run of each mode, newest first.
    async fn last_runs(&self) -> Result<Vec<SyncRunRecord>, StateError>;
}

/// SQLite implementation of the record store.
pub struct SqliteScrobbleStore {
    /// rusqlite::Connection is not Sync. Every statement here is short, so
    /// the lock is never held across an await.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteScrobbleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteScrobbleStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteScrobbleStore {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StateError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        tracing::debug!(path = %path.display(), "Opened scrobble database");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    fn scalar_timestamp(&self, sql: &str) -> Result<Option<i64>, StateError> {
        let conn = self.lock()?;
        conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
            .map_err(StateError::query)
    }
}

#[async_trait]
impl ScrobbleStore for SqliteScrobbleStore {
    async fn insert_if_absent(&self, record: &ScrobbleRecord) -> Result<InsertOutcome, StateError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                r#"
                INSERT INTO scrobbles (artist, artist_external_id, album, album_external_id, track, track_external_id, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(timestamp) DO NOTHING
                "#,
                rusqlite::params![
                    &record.artist,
                    &record.artist_external_id,
                    &record.album,
                    &record.album_external_id,
                    &record.track,
                    &record.track_external_id,
                    record.timestamp,
                ],
            )
            .map_err(StateError::query)?;

        Ok(if changed == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn max_timestamp(&self) -> Result<Option<i64>, StateError> {
        self.scalar_timestamp("SELECT MAX(timestamp) FROM scrobbles")
    }

    async fn min_timestamp(&self) -> Result<Option<i64>, StateError> {
        self.scalar_timestamp("SELECT MIN(timestamp) FROM scrobbles")
    }

    async fn exists_at(&self, timestamp: i64) -> Result<bool, StateError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM scrobbles WHERE timestamp = ?1",
                [timestamp],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        Ok(found.is_some())
    }

    async fn records_in_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<ScrobbleRecord>, StateError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT artist, artist_external_id, album, album_external_id, track, track_external_id, timestamp FROM scrobbles WHERE timestamp BETWEEN ?1 AND ?2 ORDER BY timestamp ASC",
            )
            .map_err(StateError::query)?;

        let records = stmt
            .query_map([start, end], row_to_scrobble)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(records)
    }

    async fn summary(&self) -> Result<StoreSummary, StateError> {
        let conn = self.lock()?;

        let (total, distinct_artists, distinct_tracks, newest, oldest) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT artist), COUNT(DISTINCT track), MAX(timestamp), MIN(timestamp) FROM scrobbles",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                },
            )
            .map_err(StateError::query)?;

        Ok(StoreSummary {
            total: total as u64,
            distinct_artists: distinct_artists as u64,
            distinct_tracks: distinct_tracks as u64,
            newest: newest.and_then(from_unix),
            oldest: oldest.and_then(from_unix),
        })
    }

    async fn start_sync_run(&self, mode: SyncMode) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (mode, started_at) VALUES (?1, ?2)",
            rusqlite::params![mode.as_str(), started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, pages_fetched = ?2, inserted = ?3, already_present = ?4, interrupted = ?5, error = ?6 WHERE id = ?7",
            rusqlite::params![
                completed_at,
                stats.pages_fetched as i64,
                stats.inserted as i64,
                stats.already_present as i64,
                stats.interrupted,
                &stats.error,
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn last_runs(&self) -> Result<Vec<SyncRunRecord>, StateError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT mode, started_at, completed_at, pages_fetched, inserted, already_present, interrupted, error FROM sync_runs WHERE id IN (SELECT MAX(id) FROM sync_runs GROUP BY mode) ORDER BY id DESC",
            )
            .map_err(StateError::query)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    SyncRunStats {
                        pages_fetched: row.get::<_, i64>(3)? as u64,
                        inserted: row.get::<_, i64>(4)? as u64,
                        already_present: row.get::<_, i64>(5)? as u64,
                        interrupted: row.get(6)?,
                        error: row.get(7)?,
                    },
                ))
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        let runs = rows
            .into_iter()
            .filter_map(|(mode, started_at, completed_at, stats)| {
                let Some(mode) = SyncMode::from_str(&mode) else {
                    tracing::warn!(mode = %mode, "Ignoring sync run with unknown mode");
                    return None;
                };
                Some(SyncRunRecord {
                    mode,
                    started_at: from_unix(started_at).unwrap_or(DateTime::UNIX_EPOCH),
                    completed_at: completed_at.and_then(from_unix),
                    stats,
                })
            })
            .collect();

        Ok(runs)
    }
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

fn row_to_scrobble(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScrobbleRecord> {
    Ok(ScrobbleRecord {
        artist: row.get(0)?,
        artist_external_id: row.get(1)?,
        album: row.get(2)?,
        album_external_id: row.get(3)?,
        track: row.get(4)?,
        track_external_id: row.get(5)?,
        timestamp: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use crate::test_support::scrobble;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("lytter-rs")
            .join("store_tests")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_open_creates_db_and_parent_dirs() {
        let dir = test_dir("open_creates");
        let path = dir.join("nested").join("music.db");
        let store = SqliteScrobbleStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = test_dir("reopen");
        let path = dir.join("music.db");
        {
            let store = SqliteScrobbleStore::open(&path).await.unwrap();
            store.insert_if_absent(&scrobble(500)).await.unwrap();
        }
        let store = SqliteScrobbleStore::open(&path).await.unwrap();
        assert_eq!(store.max_timestamp().await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        let record = scrobble(1_700_000_000);

        assert_eq!(
            store.insert_if_absent(&record).await.unwrap(),
            InsertOutcome::Inserted
        );
        for _ in 0..5 {
            assert_eq!(
                store.insert_if_absent(&record).await.unwrap(),
                InsertOutcome::AlreadyExists
            );
        }

        let rows = store
            .records_in_range(i64::MIN, i64::MAX)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_different_payload_is_duplicate() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        store.insert_if_absent(&scrobble(42)).await.unwrap();

        let mut other = scrobble(42);
        other.artist = "Someone Else".into();
        assert_eq!(
            store.insert_if_absent(&other).await.unwrap(),
            InsertOutcome::AlreadyExists
        );

        let rows = store.records_in_range(42, 42).await.unwrap();
        assert_eq!(rows[0].artist, scrobble(42).artist);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_store_one_row() {
        let store = Arc::new(SqliteScrobbleStore::open_in_memory().unwrap());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert_if_absent(&scrobble(777)).await.unwrap() })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.summary().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_frontier_empty_store() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        assert_eq!(store.max_timestamp().await.unwrap(), None);
        assert_eq!(store.min_timestamp().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frontier_and_exists_at() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        for ts in [300, 100, 200] {
            store.insert_if_absent(&scrobble(ts)).await.unwrap();
        }
        assert_eq!(store.max_timestamp().await.unwrap(), Some(300));
        assert_eq!(store.min_timestamp().await.unwrap(), Some(100));
        assert!(store.exists_at(200).await.unwrap());
        assert!(!store.exists_at(250).await.unwrap());
    }

    #[tokio::test]
    async fn test_records_in_range_is_ascending_and_inclusive() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        for ts in [500, 100, 400, 200, 300] {
            store.insert_if_absent(&scrobble(ts)).await.unwrap();
        }

        let stamps: Vec<i64> = store
            .records_in_range(200, 400)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(stamps, vec![200, 300, 400]);
    }

    #[tokio::test]
    async fn test_optional_fields_roundtrip_as_null() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        let record = ScrobbleRecord {
            artist: "Röyksopp".into(),
            artist_external_id: None,
            album: None,
            album_external_id: None,
            track: "Eple".into(),
            track_external_id: Some("abc-123".into()),
            timestamp: 9,
        };
        store.insert_if_absent(&record).await.unwrap();
        assert_eq!(store.records_in_range(9, 9).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        let mut a = scrobble(100);
        a.artist = "A".into();
        a.track = "one".into();
        let mut b = scrobble(200);
        b.artist = "A".into();
        b.track = "two".into();
        let mut c = scrobble(300);
        c.artist = "B".into();
        c.track = "one".into();
        for r in [&a, &b, &c] {
            store.insert_if_absent(r).await.unwrap();
        }

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.distinct_artists, 2);
        assert_eq!(summary.distinct_tracks, 2);
        assert_eq!(summary.newest.unwrap().timestamp(), 300);
        assert_eq!(summary.oldest.unwrap().timestamp(), 100);
    }

    #[tokio::test]
    async fn test_summary_empty_store() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        assert_eq!(store.summary().await.unwrap(), StoreSummary::default());
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();

        let first = store.start_sync_run(SyncMode::Incremental).await.unwrap();
        store
            .complete_sync_run(
                first,
                &SyncRunStats {
                    pages_fetched: 1,
                    inserted: 3,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let second = store.start_sync_run(SyncMode::Incremental).await.unwrap();
        store
            .complete_sync_run(
                second,
                &SyncRunStats {
                    pages_fetched: 2,
                    inserted: 7,
                    already_present: 50,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let full = store.start_sync_run(SyncMode::Full).await.unwrap();
        store
            .complete_sync_run(
                full,
                &SyncRunStats {
                    interrupted: true,
                    error: Some("boom".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let runs = store.last_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].mode, SyncMode::Full);
        assert!(runs[0].stats.interrupted);
        assert_eq!(runs[0].stats.error.as_deref(), Some("boom"));
        assert_eq!(runs[1].mode, SyncMode::Incremental);
        assert_eq!(runs[1].stats.inserted, 7);
        assert_eq!(runs[1].stats.already_present, 50);
        assert!(runs[1].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unfinished_sync_run_has_no_completion() {
        let store = SqliteScrobbleStore::open_in_memory().unwrap();
        store.start_sync_run(SyncMode::Thorough).await.unwrap();
        let runs = store.last_runs().await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].completed_at.is_none());
    }
}
