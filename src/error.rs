//! Centralized error types for mailindex.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailindex library.
///
/// File-level problems (unreadable, oversized, malformed messages) are *not*
/// represented here; those are [`SkipReason`]s handled inside the
/// reconciliation pass. This enum covers failures that must reach callers.
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mail store root does not exist or is not a directory.
    #[error("Mail store root not found: {0}")]
    RootNotFound(PathBuf),

    /// Underlying SQLite failure (store-fatal).
    #[error("Index store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A schema migration failed; no partial schema is left live.
    #[error("Schema migration to version {version} failed: {reason}")]
    Migration { version: i64, reason: String },

    /// The index file could not be created with restrictive permissions.
    #[error("Cannot create index store at '{path}': {reason}")]
    StoreCreate { path: PathBuf, reason: String },

    /// Empty or whitespace-only search query.
    #[error("Search query is empty")]
    InvalidQuery,

    /// Search limit outside the accepted range.
    #[error("Search limit {0} out of range")]
    InvalidLimit(usize),

    /// Write attempted after the manager was closed.
    #[error("Index store is closed")]
    Closed,

    /// The watcher could not be started.
    #[error("Filesystem watcher error: {0}")]
    Watcher(String),
}

/// Convenience alias for `Result<T, IndexError>`.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a single message file was excluded from the current pass.
///
/// Skips are logged and counted, retried naturally on the next scan, and
/// never escalate past the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// File larger than the configured size cap.
    Oversize { size: u64, cap: u64 },
    /// File vanished between the scan and the read.
    Vanished,
    /// File could not be read.
    Unreadable(String),
    /// The embedded message could not be parsed at all.
    Malformed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversize { size, cap } => {
                write!(f, "file size {size} exceeds cap {cap}")
            }
            Self::Vanished => write!(f, "file vanished during scan"),
            Self::Unreadable(e) => write!(f, "unreadable: {e}"),
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
        }
    }
}
