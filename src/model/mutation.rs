//! Ephemeral reconciliation types: inventory entries, mutations, counts.

use std::path::PathBuf;

use super::{Fingerprint, MessageKey, MessageRecord};

/// One message file observed during a disk scan.
///
/// Produced fresh each reconciliation pass and never persisted.
#[derive(Debug, Clone)]
pub struct InventoryEntry {
    /// Identity key derived from the file name.
    pub key: MessageKey,
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Account the file belongs to.
    pub account: String,
    /// Mailbox path the file belongs to.
    pub mailbox: String,
    /// mtime + size signature.
    pub fingerprint: Fingerprint,
    /// Message-ID header sniffed without a full parse, for move pairing.
    pub message_id: Option<String>,
}

/// A single change to apply to the persistent index.
///
/// Produced in order by the reconciliation engine and applied by the write
/// coordinator inside one transaction per batch.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert a record, replacing any existing row with the same key.
    Insert(Box<MessageRecord>),
    /// Remove the record with this key.
    Delete(MessageKey),
    /// The file moved; update location fields without touching the body.
    UpdatePath {
        key: MessageKey,
        new_path: PathBuf,
        new_account: String,
        new_mailbox: String,
        fingerprint: Fingerprint,
    },
    /// The file was renamed, so the key derived from its name changed.
    /// Replaces the old row with a freshly parsed record; counted as a move.
    Rekey {
        old_key: MessageKey,
        record: Box<MessageRecord>,
    },
}

/// Mutation counts returned by `sync` and `rebuild`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncCounts {
    /// Records inserted or replaced.
    pub inserted: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Records whose path was updated in place.
    pub moved: usize,
    /// Files excluded from this pass (oversize, unreadable, malformed).
    pub skipped: usize,
}

impl SyncCounts {
    /// Total number of index mutations (skips excluded).
    pub fn total_changes(&self) -> usize {
        self.inserted + self.deleted + self.moved
    }
}

impl std::ops::AddAssign for SyncCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.deleted += rhs.deleted;
        self.moved += rhs.moved;
        self.skipped += rhs.skipped;
    }
}
