//! Durable scrobble record store.
//!
//! SQLite-backed, keyed by scrobble timestamp. Provides:
//! - Idempotent inserts (a timestamp is stored at most once)
//! - Frontier lookups for incremental sync
//! - Ordered range scans for gap detection
//! - Per-mode sync run history for status reporting

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{ScrobbleStore, SqliteScrobbleStore};
pub use error::StateError;
pub use types::{InsertOutcome, ScrobbleRecord, StoreSummary, SyncRunRecord, SyncRunStats};
