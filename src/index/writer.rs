//! Single-writer mutation path.
//!
//! Every change to the store goes through [`apply_mutations`], which wraps
//! the whole batch in one transaction. Readers see the state before the sync
//! or after it, never a half-applied batch.

use chrono::Utc;
use rusqlite::{params, Connection, Transaction};
use tracing::debug;

use crate::error::Result;
use crate::model::{MessageRecord, Mutation, SyncCounts};
use crate::scan::Scope;

/// Apply a batch of mutations in a single transaction and record the sync
/// in `sync_state`. Returns the per-kind counts actually applied.
pub fn apply_mutations(
    conn: &mut Connection,
    scope: &Scope,
    mutations: &[Mutation],
    skipped: usize,
) -> Result<SyncCounts> {
    let tx = conn.transaction()?;
    let mut counts = SyncCounts {
        skipped,
        ..SyncCounts::default()
    };

    {
        let mut insert = tx.prepare_cached(
            "INSERT OR REPLACE INTO messages
                (key, account, mailbox, sender, subject, date_received,
                 is_read, is_flagged, flags, message_id, body, path,
                 mtime_secs, size, attachment_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        let mut delete = tx.prepare_cached("DELETE FROM messages WHERE key = ?1")?;
        let mut drop_attachments =
            tx.prepare_cached("DELETE FROM attachments WHERE message_key = ?1")?;
        let mut add_attachment = tx.prepare_cached(
            "INSERT INTO attachments (message_key, filename, mime_type, size)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut reparent = tx.prepare_cached(
            "UPDATE messages
             SET path = ?2, account = ?3, mailbox = ?4, mtime_secs = ?5, size = ?6
             WHERE key = ?1",
        )?;

        for mutation in mutations {
            match mutation {
                Mutation::Insert(record) => {
                    drop_attachments.execute([record.key.as_i64()])?;
                    insert_record(&mut insert, record)?;
                    insert_attachments(&mut add_attachment, record)?;
                    counts.inserted += 1;
                }
                Mutation::Delete(key) => {
                    delete.execute([key.as_i64()])?;
                    counts.deleted += 1;
                }
                Mutation::UpdatePath {
                    key,
                    new_path,
                    new_account,
                    new_mailbox,
                    fingerprint,
                } => {
                    reparent.execute(params![
                        key.as_i64(),
                        new_path.to_string_lossy(),
                        new_account,
                        new_mailbox,
                        fingerprint.mtime_secs,
                        fingerprint.size as i64,
                    ])?;
                    counts.moved += 1;
                }
                Mutation::Rekey { old_key, record } => {
                    delete.execute([old_key.as_i64()])?;
                    drop_attachments.execute([record.key.as_i64()])?;
                    insert_record(&mut insert, record)?;
                    insert_attachments(&mut add_attachment, record)?;
                    counts.moved += 1;
                }
            }
        }
    }

    record_sync(&tx, scope, &counts)?;
    tx.commit()?;
    debug!(scope = %scope, changes = counts.total_changes(), "Applied mutation batch");
    Ok(counts)
}

fn insert_record(
    stmt: &mut rusqlite::CachedStatement<'_>,
    record: &MessageRecord,
) -> Result<()> {
    stmt.execute(params![
        record.key.as_i64(),
        record.account,
        record.mailbox,
        record.sender,
        record.subject,
        record.date_received.timestamp(),
        record.is_read,
        record.is_flagged,
        record.flags,
        record.message_id,
        record.body,
        record.path.to_string_lossy(),
        record.fingerprint.mtime_secs,
        record.fingerprint.size as i64,
        record.attachments.len() as i64,
    ])?;
    Ok(())
}

fn insert_attachments(
    stmt: &mut rusqlite::CachedStatement<'_>,
    record: &MessageRecord,
) -> Result<()> {
    for attachment in &record.attachments {
        stmt.execute(params![
            record.key.as_i64(),
            attachment.filename,
            attachment.mime_type,
            attachment.size as i64,
        ])?;
    }
    Ok(())
}

fn record_sync(tx: &Transaction<'_>, scope: &Scope, counts: &SyncCounts) -> Result<()> {
    tx.execute(
        "INSERT INTO sync_state (scope, last_sync, inserted, deleted, moved, skipped)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(scope) DO UPDATE SET
            last_sync     = excluded.last_sync,
            inserted      = excluded.inserted,
            deleted       = excluded.deleted,
            moved         = excluded.moved,
            skipped       = excluded.skipped,
            last_error    = NULL,
            last_error_at = NULL",
        params![
            scope.to_string(),
            Utc::now().timestamp(),
            counts.inserted as i64,
            counts.deleted as i64,
            counts.moved as i64,
            counts.skipped as i64,
        ],
    )?;
    Ok(())
}

/// Best-effort record of a failed sync so `status` can report degradation.
pub fn record_failure(conn: &Connection, scope: &Scope, reason: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (scope, last_sync, last_error, last_error_at)
         VALUES (?1, 0, ?2, ?3)
         ON CONFLICT(scope) DO UPDATE SET
            last_error    = excluded.last_error,
            last_error_at = excluded.last_error_at",
        params![scope.to_string(), reason, Utc::now().timestamp()],
    )?;
    Ok(())
}

/// Drop every row in `scope` so a following sync re-inserts from disk.
pub fn clear_scope(conn: &mut Connection, scope: &Scope) -> Result<u64> {
    let removed = match (&scope.account, &scope.mailbox) {
        (None, _) => conn.execute("DELETE FROM messages", [])?,
        (Some(a), None) => {
            conn.execute("DELETE FROM messages WHERE account = ?1", [a])?
        }
        (Some(a), Some(m)) => conn.execute(
            "DELETE FROM messages
             WHERE account = ?1 AND (mailbox = ?2 OR mailbox LIKE ?2 || '/%')",
            params![a, m],
        )?,
    };
    debug!(scope = %scope, removed, "Cleared store scope");
    Ok(removed as u64)
}
