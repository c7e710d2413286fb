//! Reconciliation engine: diff the disk against the store and converge.
//!
//! A pass scans the tree, loads the matching store inventory, plans a
//! mutation batch from the key-set diff, then applies the batch through the
//! writer in one transaction. Running the same pass twice in a row yields
//! zero changes the second time.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::IndexingConfig;
use crate::error::Result;
use crate::index::{store_inventory, writer, IndexManager};
use crate::model::{InventoryEntry, MessageKey, Mutation, SyncCounts};
use crate::parser;
use crate::scan::{self, Scope};

/// mtime slack when pairing a removed and an added file as one rename.
/// Copy-then-delete movers can nudge the timestamp slightly.
const MTIME_TOLERANCE_SECS: i64 = 2;

/// One planned reconciliation step, before any file is parsed.
#[derive(Debug, PartialEq, Eq)]
enum Planned {
    /// New file; parse and insert. Index into the disk inventory.
    Add(usize),
    /// Same key, content fingerprint changed; re-parse and replace.
    Reparse(usize),
    /// Same key at a new path; metadata-only update.
    Move { key: MessageKey, disk: usize },
    /// Removed and added files paired as one rename; parse the new file.
    Rekey { old: MessageKey, disk: usize },
    /// Indexed row with no file behind it.
    Remove(MessageKey),
}

/// Run one reconciliation pass over `scope` and apply the result.
///
/// On failure a best-effort degradation marker is left in the store so
/// `status` can report the failed sync.
pub fn sync_scope(
    manager: &IndexManager,
    root: &Path,
    scope: &Scope,
    opts: &IndexingConfig,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<SyncCounts> {
    match run_pass(manager, root, scope, opts, progress) {
        Ok(counts) => Ok(counts),
        Err(e) => {
            let note = e.to_string();
            let _ = manager.with_writer(|conn| writer::record_failure(conn, scope, &note));
            Err(e)
        }
    }
}

fn run_pass(
    manager: &IndexManager,
    root: &Path,
    scope: &Scope,
    opts: &IndexingConfig,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<SyncCounts> {
    let disk = scan::scan_tree(root, scope)?;
    let store = {
        let conn = manager.read_conn()?;
        store_inventory(&conn, scope)?
    };
    debug!(
        scope = %scope,
        disk = disk.len(),
        indexed = store.len(),
        "Planning reconciliation"
    );

    let plan = plan_mutations(&disk, &store);
    let total = plan.len() as u64;
    let mut mutations = Vec::with_capacity(plan.len());
    let mut skipped: usize = 0;

    for (done, step) in plan.into_iter().enumerate() {
        if let Some(cb) = progress {
            cb(done as u64, total);
        }
        match step {
            Planned::Remove(key) => mutations.push(Mutation::Delete(key)),
            Planned::Move { key, disk: i } => {
                let entry = &disk[i];
                mutations.push(Mutation::UpdatePath {
                    key,
                    new_path: entry.path.clone(),
                    new_account: entry.account.clone(),
                    new_mailbox: entry.mailbox.clone(),
                    fingerprint: entry.fingerprint,
                });
            }
            Planned::Add(i) | Planned::Reparse(i) => {
                match parse_entry(&disk[i], opts) {
                    Some(record) => mutations.push(Mutation::Insert(Box::new(record))),
                    None => skipped += 1,
                }
            }
            Planned::Rekey { old, disk: i } => match parse_entry(&disk[i], opts) {
                Some(record) => mutations.push(Mutation::Rekey {
                    old_key: old,
                    record: Box::new(record),
                }),
                // The new file is unreadable; drop the stale row anyway.
                None => {
                    mutations.push(Mutation::Delete(old));
                    skipped += 1;
                }
            },
        }
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    let counts =
        manager.with_writer(|conn| writer::apply_mutations(conn, scope, &mutations, skipped))?;
    info!(
        scope = %scope,
        inserted = counts.inserted,
        deleted = counts.deleted,
        moved = counts.moved,
        skipped = counts.skipped,
        "Sync complete"
    );
    Ok(counts)
}

/// Drop every indexed row in `scope` and re-index from disk.
pub fn rebuild_scope(
    manager: &IndexManager,
    root: &Path,
    scope: &Scope,
    opts: &IndexingConfig,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<SyncCounts> {
    let removed = manager.with_writer(|conn| writer::clear_scope(conn, scope))?;
    info!(scope = %scope, removed, "Cleared scope for rebuild");
    sync_scope(manager, root, scope, opts, progress)
}

fn parse_entry(entry: &InventoryEntry, opts: &IndexingConfig) -> Option<crate::model::MessageRecord> {
    match parser::parse_emlx(
        &entry.path,
        &entry.account,
        &entry.mailbox,
        opts.max_message_size,
        opts.max_body_size,
    ) {
        Ok(mut record) => {
            // The scanner decides identity; a collision-degraded key must
            // survive the parse, which only knows the file name.
            record.key = entry.key;
            Some(record)
        }
        Err(reason) => {
            warn!(path = %entry.path.display(), %reason, "Skipping message file");
            None
        }
    }
}

/// Diff the two inventories into an ordered plan.
///
/// Deletes come before inserts so a new file landing on a path the store
/// still attributes to a removed message never trips the unique constraint.
fn plan_mutations(disk: &[InventoryEntry], store: &[InventoryEntry]) -> Vec<Planned> {
    let store_by_key: HashMap<MessageKey, &InventoryEntry> =
        store.iter().map(|e| (e.key, e)).collect();
    let disk_keys: std::collections::HashSet<MessageKey> =
        disk.iter().map(|e| e.key).collect();

    let mut moves = Vec::new();
    let mut reparses = Vec::new();
    let mut added: Vec<usize> = Vec::new();

    for (i, entry) in disk.iter().enumerate() {
        match store_by_key.get(&entry.key) {
            Some(indexed) => {
                if entry.fingerprint != indexed.fingerprint {
                    reparses.push(Planned::Reparse(i));
                } else if entry.path != indexed.path {
                    moves.push(Planned::Move {
                        key: entry.key,
                        disk: i,
                    });
                }
            }
            None => added.push(i),
        }
    }

    let removed: Vec<&InventoryEntry> = store
        .iter()
        .filter(|e| !disk_keys.contains(&e.key))
        .collect();

    let (rekeys, adds, removes) = pair_renames(disk, added, removed);

    let mut plan = removes;
    plan.extend(rekeys);
    plan.extend(moves);
    plan.extend(reparses);
    plan.extend(adds);
    plan
}

/// Pair removed rows with added files that are really the same message under
/// a new name. Message-ID is the primary hint; a unique size match with
/// mtime inside the tolerance is the fallback. Anything ambiguous stays a
/// plain delete plus insert.
fn pair_renames(
    disk: &[InventoryEntry],
    added: Vec<usize>,
    removed: Vec<&InventoryEntry>,
) -> (Vec<Planned>, Vec<Planned>, Vec<Planned>) {
    let mut rekeys = Vec::new();
    let mut adds = Vec::new();
    let mut unpaired_removed: Vec<&InventoryEntry> = removed;

    let mut by_message_id: HashMap<&str, usize> = HashMap::new();
    for (pos, entry) in unpaired_removed.iter().enumerate() {
        if let Some(ref id) = entry.message_id {
            by_message_id.insert(id.as_str(), pos);
        }
    }

    let mut claimed: std::collections::HashSet<usize> = std::collections::HashSet::new();
    let mut still_added: Vec<usize> = Vec::new();

    // First pass: exact Message-ID matches.
    for i in added {
        let hint = disk[i].message_id.as_deref();
        match hint.and_then(|id| by_message_id.get(id)) {
            Some(&pos) if !claimed.contains(&pos) => {
                claimed.insert(pos);
                rekeys.push(Planned::Rekey {
                    old: unpaired_removed[pos].key,
                    disk: i,
                });
            }
            _ => still_added.push(i),
        }
    }

    // Second pass: a unique fingerprint match pairs the rest.
    for i in still_added {
        let fp = disk[i].fingerprint;
        let candidates: Vec<usize> = unpaired_removed
            .iter()
            .enumerate()
            .filter(|(pos, e)| {
                !claimed.contains(pos)
                    && e.fingerprint.size == fp.size
                    && (e.fingerprint.mtime_secs - fp.mtime_secs).abs() <= MTIME_TOLERANCE_SECS
            })
            .map(|(pos, _)| pos)
            .collect();
        if let [pos] = candidates[..] {
            claimed.insert(pos);
            rekeys.push(Planned::Rekey {
                old: unpaired_removed[pos].key,
                disk: i,
            });
        } else {
            adds.push(Planned::Add(i));
        }
    }

    let removes = unpaired_removed
        .drain(..)
        .enumerate()
        .filter(|(pos, _)| !claimed.contains(pos))
        .map(|(_, e)| Planned::Remove(e.key))
        .collect();

    (rekeys, adds, removes)
}
