//! Store-side inventory: the set of indexed entries the reconciler diffs
//! against the disk scan.

use std::path::PathBuf;

use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::model::{Fingerprint, InventoryEntry, MessageKey};
use crate::scan::Scope;

/// Load every indexed entry inside `scope`, ordered by path to mirror the
/// disk scan.
pub fn store_inventory(conn: &Connection, scope: &Scope) -> Result<Vec<InventoryEntry>> {
    const COLS: &str = "key, path, account, mailbox, mtime_secs, size, message_id";

    let mut entries = Vec::new();
    match (&scope.account, &scope.mailbox) {
        (None, _) => {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLS} FROM messages ORDER BY path"))?;
            let rows = stmt.query_map([], row_to_entry)?;
            for row in rows {
                entries.push(row?);
            }
        }
        (Some(a), None) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM messages WHERE account = ?1 ORDER BY path"
            ))?;
            let rows = stmt.query_map([a], row_to_entry)?;
            for row in rows {
                entries.push(row?);
            }
        }
        (Some(a), Some(m)) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM messages
                 WHERE account = ?1 AND (mailbox = ?2 OR mailbox LIKE ?2 || '/%')
                 ORDER BY path"
            ))?;
            let rows = stmt.query_map(params![a, m], row_to_entry)?;
            for row in rows {
                entries.push(row?);
            }
        }
    }
    Ok(entries)
}

/// Indexed message keys inside `scope`, for external inspection.
pub fn indexed_keys(conn: &Connection, scope: &Scope) -> Result<Vec<MessageKey>> {
    let entries = store_inventory(conn, scope)?;
    Ok(entries.into_iter().map(|e| e.key).collect())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<InventoryEntry> {
    Ok(InventoryEntry {
        key: MessageKey::from_i64(row.get(0)?),
        path: PathBuf::from(row.get::<_, String>(1)?),
        account: row.get(2)?,
        mailbox: row.get(3)?,
        fingerprint: Fingerprint {
            mtime_secs: row.get(4)?,
            size: row.get::<_, i64>(5)? as u64,
        },
        message_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema;

    fn seed(conn: &Connection, key: i64, account: &str, mailbox: &str, path: &str) {
        conn.execute(
            "INSERT INTO messages (key, account, mailbox, path, mtime_secs, size)
             VALUES (?1, ?2, ?3, ?4, 100, 10)",
            params![key, account, mailbox, path],
        )
        .unwrap();
    }

    #[test]
    fn test_inventory_ordered_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = schema::open_writer(&tmp.path().join("index.db")).unwrap();
        seed(&conn, 2, "a", "INBOX", "/mail/a/INBOX/2.emlx");
        seed(&conn, 1, "a", "INBOX", "/mail/a/INBOX/1.emlx");

        let entries = store_inventory(&conn, &Scope::all()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].path < entries[1].path);
    }

    #[test]
    fn test_inventory_scope_includes_submailboxes() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = schema::open_writer(&tmp.path().join("index.db")).unwrap();
        seed(&conn, 1, "a", "Projects", "/mail/a/Projects/1.emlx");
        seed(&conn, 2, "a", "Projects/2024", "/mail/a/Projects/2024/2.emlx");
        seed(&conn, 3, "b", "Projects", "/mail/b/Projects/3.emlx");

        let scope = Scope {
            account: Some("a".into()),
            mailbox: Some("Projects".into()),
        };
        let keys = indexed_keys(&conn, &scope).unwrap();
        assert_eq!(keys, vec![MessageKey(1), MessageKey(2)]);
    }
}
