//! Disk inventory scanner: walks the mail-store tree and produces a
//! path-ordered snapshot of every per-message file.
//!
//! The walk tolerates concurrent mutation of the tree: an entry that
//! vanishes between listing and stat is an acceptable miss, corrected on the
//! next pass. The scan as a whole never fails because one entry disappeared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{IndexError, Result};
use crate::model::{Fingerprint, InventoryEntry, MessageKey};
use crate::parser;

/// File extension recognized as a per-message file.
const MESSAGE_EXT: &str = "emlx";

/// Restrict a scan (and the sync built on it) to part of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Limit to one account (first-level directory).
    pub account: Option<String>,
    /// Limit to one mailbox path within the account.
    pub mailbox: Option<String>,
}

impl Scope {
    /// Scope covering the whole tree.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether an (account, mailbox) pair falls inside this scope.
    pub fn contains(&self, account: &str, mailbox: &str) -> bool {
        if let Some(ref a) = self.account {
            if a != account {
                return false;
            }
        }
        if let Some(ref m) = self.mailbox {
            if m != mailbox && !mailbox.starts_with(&format!("{m}/")) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.account, &self.mailbox) {
            (None, _) => write!(f, "all"),
            (Some(a), None) => write!(f, "{a}"),
            (Some(a), Some(m)) => write!(f, "{a}/{m}"),
        }
    }
}

/// Walk the mail-store root and return every message file in scope, ordered
/// by path.
pub fn scan_tree(root: &Path, scope: &Scope) -> Result<Vec<InventoryEntry>> {
    if !root.is_dir() {
        return Err(IndexError::RootNotFound(root.to_path_buf()));
    }

    let mut entries = Vec::new();

    for item in WalkDir::new(root).sort_by_file_name() {
        let item = match item {
            Ok(i) => i,
            Err(e) => {
                // A subtree we cannot descend into is a miss, not a failure.
                debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXT) {
            continue;
        }

        let Some((account, mailbox)) = classify_path(root, path) else {
            warn!(path = %path.display(), "Message file directly under root, skipping");
            continue;
        };
        if !scope.contains(&account, &mailbox) {
            continue;
        }

        // Files can vanish between the walk yielding them and the stat.
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Entry vanished mid-scan");
                continue;
            }
        };

        entries.push(InventoryEntry {
            key: MessageKey::from_path(path),
            path: path.to_path_buf(),
            account,
            mailbox,
            fingerprint: Fingerprint::from_metadata(&meta),
            message_id: parser::sniff_message_id(path),
        });
    }

    degrade_key_collisions(root, &mut entries);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Give files whose stems collide a path-derived key instead.
///
/// Two live files with the same name in different mailboxes would otherwise
/// share one stem-derived key and fight over a single record on every pass.
/// The relative path is unique, so the fallback key keeps both indexed; a
/// later move of such a file changes its key and is repaired through rename
/// pairing.
fn degrade_key_collisions(root: &Path, entries: &mut [InventoryEntry]) {
    let mut by_key: HashMap<MessageKey, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        by_key.entry(entry.key).or_default().push(i);
    }
    for (key, indices) in by_key {
        if indices.len() < 2 {
            continue;
        }
        warn!(
            %key,
            count = indices.len(),
            "Duplicate message file names in scan; switching to path-derived keys"
        );
        for i in indices {
            let fallback = {
                let rel = entries[i].path.strip_prefix(root).unwrap_or(&entries[i].path);
                MessageKey::from_relative_path(rel)
            };
            entries[i].key = fallback;
        }
    }
}

/// Derive `(account, mailbox)` from a message file path under the root.
///
/// The first component is the account. The remaining directory components
/// form the mailbox path: `.mbox` suffixes are stripped and `Messages`
/// container directories are skipped. A file directly inside the account
/// directory lands in `INBOX`.
///
/// Returns `None` for files that sit directly under the root.
pub fn classify_path(root: &Path, path: &Path) -> Option<(String, String)> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    // Last component is the file name.
    components.pop();
    if components.is_empty() {
        return None;
    }

    let account = components.remove(0);
    let mailbox_parts: Vec<String> = components
        .into_iter()
        .filter(|c| c != "Messages")
        .map(|c| c.strip_suffix(".mbox").map(str::to_string).unwrap_or(c))
        .collect();

    let mailbox = if mailbox_parts.is_empty() {
        "INBOX".to_string()
    } else {
        mailbox_parts.join("/")
    };

    Some((account, mailbox))
}

/// Resolve a changed path (from the watcher) to the narrowest scan scope.
///
/// A path under `<root>/<account>/<mailbox…>` maps to that account's scope; a
/// path at or above the account level widens to the whole tree.
pub fn scope_for_path(root: &Path, path: &Path) -> Scope {
    let Ok(rel) = path.strip_prefix(root) else {
        return Scope::all();
    };
    let mut components = rel.components();
    let Some(first) = components.next() else {
        return Scope::all();
    };
    Scope {
        account: Some(first.as_os_str().to_string_lossy().into_owned()),
        mailbox: None,
    }
}
