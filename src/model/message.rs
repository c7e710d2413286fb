//! Indexed message record and its identity/fingerprint types.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Stable identity key correlating a disk file with a store record across
/// renames.
///
/// Mail stores in the Apple style name each message file with a numeric id
/// (`12345.emlx`) that survives moves between mailboxes. When the stem is all
/// digits it *is* the key; otherwise the key is derived from the stem by
/// hashing, so any stable file name still yields a stable key.
///
/// Distinct files sharing a stem would share a key; the scanner detects that
/// and falls back to [`MessageKey::from_relative_path`] for the colliding
/// files so each one keeps its own record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MessageKey(pub u64);

impl MessageKey {
    /// Derive the key from a message file path.
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) {
            // Numeric stems may exceed u64 in pathological cases; hash those.
            if let Ok(n) = stem.parse::<u64>() {
                return Self(n);
            }
        }

        let digest = Sha256::digest(stem.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Derive the key from a root-relative path instead of the bare stem.
    ///
    /// Used when two scanned files share a stem: the full relative path is
    /// unique, so each colliding file gets its own deterministic key. Such a
    /// key changes when the file moves; the rename-pairing pass repairs that
    /// as a single move.
    pub fn from_relative_path(rel: &Path) -> Self {
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let digest = Sha256::digest(joined.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// The key as a signed value for SQLite storage.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Reconstruct a key from its SQLite representation.
    pub fn from_i64(v: i64) -> Self {
        Self(v as u64)
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cheap change-detection signature: modification time + size.
///
/// Comparing fingerprints avoids re-parsing message bodies when nothing
/// changed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint {
    /// Modification time as Unix seconds.
    pub mtime_secs: i64,
    /// File size in bytes.
    pub size: u64,
}

impl Fingerprint {
    /// Read the fingerprint from file metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            mtime_secs,
            size: meta.len(),
        }
    }
}

/// Metadata for one attachment, stored alongside its message.
///
/// Content is never extracted or stored; the name, type and decoded size are
/// enough to find a message by what is attached to it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// File name from the MIME headers, or a positional placeholder.
    pub filename: String,
    /// `type/subtype` content type.
    pub mime_type: String,
    /// Decoded size in bytes.
    pub size: u64,
}

/// One row of the persistent index: a fully parsed, indexable message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageRecord {
    /// Stable identity key (unique in the store).
    pub key: MessageKey,

    /// Account identifier: first path component under the mail root.
    pub account: String,

    /// Hierarchical mailbox path, `/`-joined (e.g. `Projects/2024`).
    pub mailbox: String,

    /// Sender, as `Display Name <address>` or bare address.
    pub sender: String,

    /// Decoded subject line.
    pub subject: String,

    /// Received timestamp from the `Date:` header (Unix epoch fallback).
    pub date_received: DateTime<Utc>,

    /// Whether the message has been read (flags bit 0).
    pub is_read: bool,

    /// Whether the message is flagged (flags bit 4).
    pub is_flagged: bool,

    /// The raw flags word from the .emlx trailer.
    pub flags: i64,

    /// RFC 5322 Message-ID, used as the content-identity hint for move
    /// detection.
    pub message_id: Option<String>,

    /// Plain-text body after HTML reduction, capped in size.
    pub body: String,

    /// Attachment metadata, in message order.
    pub attachments: Vec<Attachment>,

    /// Current on-disk path of the message file.
    pub path: PathBuf,

    /// Content fingerprint recorded at index time.
    pub fingerprint: Fingerprint,
}
