//! Database schema definitions and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// `timestamp` is the dedup key: one listener cannot scrobble twice in the
/// same second.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS scrobbles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    artist TEXT NOT NULL,
    artist_external_id TEXT,
    album TEXT,
    album_external_id TEXT,
    track TEXT NOT NULL,
    track_external_id TEXT,
    timestamp INTEGER UNIQUE NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scrobbles_artist ON scrobbles(artist);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mode TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    pages_fetched INTEGER DEFAULT 0,
    inserted INTEGER DEFAULT 0,
    already_present INTEGER DEFAULT 0,
    interrupted INTEGER DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_mode ON sync_runs(mode);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the database schema.
///
/// Idempotent: safe on both fresh and existing databases. Refuses to touch a
/// database written by a newer schema.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        apply_version(conn, version)?;
        set_schema_version(conn, version)?;
        tracing::debug!(version, "Applied database schema");
    }

    Ok(())
}

fn apply_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    match version {
        1 => conn.execute_batch(SCHEMA_V1)?,
        other => tracing::warn!(version = other, "No migration registered for schema version"),
    }
    Ok(())
}
