//! Live filesystem watcher.
//!
//! Debounced change notifications on the mail store root are coalesced into
//! sync scopes and handed to the serve loop over a channel. The watcher
//! never mutates the store itself; the loop that owns the writer does.
//! Dropping the [`WatchHandle`] stops the watcher.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

use notify::RecommendedWatcher;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::scan::{self, Scope};

/// Keeps the underlying watcher alive; drop to stop watching.
pub struct WatchHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Watch `root` recursively and send one deduplicated [`Scope`] per debounce
/// window through `tx`. The receiver decides when to actually sync.
pub fn watch_tree(root: &Path, debounce: Duration, tx: Sender<Scope>) -> Result<WatchHandle> {
    if !root.is_dir() {
        return Err(IndexError::RootNotFound(root.to_path_buf()));
    }

    let root = root.canonicalize().map_err(|e| IndexError::io(root, e))?;
    let watch_root = root.clone();

    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            for scope in scopes_for_events(&root, events.iter().map(|e| (&e.kind, &e.path))) {
                // Receiver gone means the serve loop exited; nothing to do.
                if tx.send(scope).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "Watcher backend error"),
    })
    .map_err(|e| IndexError::Watcher(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&watch_root, notify::RecursiveMode::Recursive)
        .map_err(|e| IndexError::Watcher(e.to_string()))?;
    debug!(root = %watch_root.display(), "Watching mail store");

    Ok(WatchHandle {
        _debouncer: debouncer,
    })
}

/// Reduce one debounced event batch to the set of scopes worth syncing.
/// Paths outside the root are rejected; duplicate scopes collapse.
fn scopes_for_events<'a>(
    root: &Path,
    events: impl Iterator<Item = (&'a DebouncedEventKind, &'a PathBuf)>,
) -> Vec<Scope> {
    let mut accounts: BTreeSet<Option<String>> = BTreeSet::new();
    for (kind, path) in events {
        if !matches!(
            kind,
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
        ) {
            continue;
        }
        if !path.starts_with(root) {
            warn!(path = %path.display(), "Ignoring event outside the mail store root");
            continue;
        }
        let scope = scan::scope_for_path(root, path);
        accounts.insert(scope.account);
    }

    // A whole-tree scope subsumes every per-account one.
    if accounts.contains(&None) {
        return vec![Scope::all()];
    }
    accounts
        .into_iter()
        .map(|account| Scope {
            account,
            mailbox: None,
        })
        .collect()
}
