//! SQLite persistence layer.
//!
//! A single [`Database`] handle wraps the connection behind a mutex; repos
//! take a `&Connection` so that multi-row writes can share one transaction.
//! Timestamps are stored as RFC3339 TEXT (millisecond precision, UTC) so
//! lexicographic ordering matches chronological ordering.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};

pub mod error;
pub mod email_repo;
pub mod feedback_repo;
pub mod link_repo;
pub mod metadata_repo;
pub mod ranking_repo;
pub mod sender_repo;
pub mod user_repo;

pub use error::DatabaseError;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "create_core_tables",
        include_str!("migrations/001_create_core_tables.sql"),
    ),
    (
        "create_job_tracking",
        include_str!("migrations/002_create_job_tracking.sql"),
    ),
];

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and migrates it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        log::info!("Opening database at {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        for (idx, (name, sql)) in MIGRATIONS.iter().enumerate() {
            let version = idx as i64 + 1;
            if version <= current {
                continue;
            }
            log::info!("Applying migration {} ({})", version, name);
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::Migration {
                    version,
                    name: name.to_string(),
                    source: e,
                })?;
            conn.pragma_update(None, "user_version", version)?;
        }

        Ok(())
    }

    /// Runs `f` with the shared connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction; commits on Ok, rolls back on Err.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Formats a timestamp for storage.
pub fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidTimestamp(raw.to_string()))
}
