//! Index lifecycle: open, inspect, close.
//!
//! One `IndexManager` owns the single writer connection for a store; every
//! mutation funnels through [`IndexManager::with_writer`]. Reads open their
//! own short-lived read-only connections so a long sync never blocks a
//! search.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::index::schema;

/// A point-in-time summary of the store, as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub message_count: u64,
    pub mailbox_count: u64,
    pub account_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
    /// Hours since the last completed sync. `None` before the first sync.
    pub staleness_hours: Option<f64>,
    /// Most recent sync failure, if one happened after the last success.
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub db_size_bytes: u64,
    pub schema_version: i64,
    /// Whether this process currently runs the live watcher.
    pub watcher_active: bool,
}

pub struct IndexManager {
    db_path: PathBuf,
    writer: Mutex<Option<Connection>>,
    watcher_active: AtomicBool,
}

impl IndexManager {
    /// Open the store at `db_path`, creating it and migrating the schema as
    /// needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = schema::open_writer(db_path)?;
        debug!(path = %db_path.display(), "Opened index store");
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(Some(conn)),
            watcher_active: AtomicBool::new(false),
        })
    }

    /// Whether a store file exists at `db_path` without opening it.
    pub fn has_index(db_path: &Path) -> bool {
        db_path.is_file()
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` with exclusive access to the writer connection.
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(IndexError::Closed),
        }
    }

    /// Open a fresh read-only connection to the store.
    pub fn read_conn(&self) -> Result<Connection> {
        schema::open_reader(&self.db_path)
    }

    /// Summarize the store. Uses a read-only connection, so this works while
    /// a sync holds the writer.
    pub fn status(&self) -> Result<IndexStatus> {
        let conn = self.read_conn()?;
        let (message_count, mailbox_count, account_count): (u64, u64, u64) = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT account || '/' || mailbox),
                    COUNT(DISTINCT account)
             FROM messages",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        let last_sync_secs: Option<i64> = conn.query_row(
            "SELECT MAX(last_sync) FROM sync_state WHERE last_sync > 0",
            [],
            |r| r.get(0),
        )?;
        let last_sync = last_sync_secs.and_then(|s| DateTime::from_timestamp(s, 0));
        let staleness_hours =
            last_sync.map(|t| (Utc::now() - t).num_seconds().max(0) as f64 / 3600.0);

        let failure: Option<(String, i64)> = conn
            .query_row(
                "SELECT last_error, last_error_at FROM sync_state
                 WHERE last_error IS NOT NULL
                 ORDER BY last_error_at DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let (last_error, last_error_at) = match failure {
            Some((msg, at)) => (Some(msg), DateTime::from_timestamp(at, 0)),
            None => (None, None),
        };

        let schema_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        let db_size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(IndexStatus {
            message_count,
            mailbox_count,
            account_count,
            last_sync,
            staleness_hours,
            last_error,
            last_error_at,
            db_size_bytes,
            schema_version,
            watcher_active: self.watcher_active.load(Ordering::Relaxed),
        })
    }

    /// Record whether this process runs the live watcher, for `status`.
    pub fn set_watcher_active(&self, active: bool) {
        self.watcher_active.store(active, Ordering::Relaxed);
    }

    /// Whether the last sync is older than `threshold_hours`. A store that
    /// has never synced is always stale.
    pub fn is_stale(&self, threshold_hours: f64) -> Result<bool> {
        let status = self.status()?;
        Ok(match status.staleness_hours {
            Some(h) => h > threshold_hours,
            None => true,
        })
    }

    /// Close the writer connection. Idempotent; later writes fail with
    /// [`IndexError::Closed`].
    pub fn close(&self) {
        let mut guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            debug!(path = %self.db_path.display(), "Closed index store");
        }
    }
}
