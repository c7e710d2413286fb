//! Store schema and versioned migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction; a store whose version is newer than this build
//! understands is refused rather than guessed at.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{IndexError, Result};

/// Schema version this build writes and understands.
pub const SCHEMA_VERSION: i64 = 2;

/// One DDL batch per version, applied in order. Index 0 takes an empty store
/// to version 1.
const MIGRATIONS: &[&str] = &[
    // v1: message rows, external-content FTS mirror, per-scope sync state.
    "
    CREATE TABLE messages (
        key           INTEGER PRIMARY KEY,
        account       TEXT NOT NULL,
        mailbox       TEXT NOT NULL,
        sender        TEXT NOT NULL DEFAULT '',
        subject       TEXT NOT NULL DEFAULT '',
        date_received INTEGER NOT NULL DEFAULT 0,
        is_read       INTEGER NOT NULL DEFAULT 0,
        is_flagged    INTEGER NOT NULL DEFAULT 0,
        flags         INTEGER NOT NULL DEFAULT 0,
        message_id    TEXT,
        body          TEXT NOT NULL DEFAULT '',
        path          TEXT NOT NULL UNIQUE,
        mtime_secs    INTEGER NOT NULL DEFAULT 0,
        size          INTEGER NOT NULL DEFAULT 0,
        attachment_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX idx_messages_mailbox ON messages(account, mailbox, date_received DESC);
    CREATE INDEX idx_messages_message_id ON messages(message_id);

    CREATE VIRTUAL TABLE messages_fts USING fts5(
        subject, sender, body,
        content='messages',
        content_rowid='key'
    );

    CREATE TRIGGER messages_ai AFTER INSERT ON messages BEGIN
        INSERT INTO messages_fts(rowid, subject, sender, body)
        VALUES (new.key, new.subject, new.sender, new.body);
    END;

    CREATE TRIGGER messages_ad AFTER DELETE ON messages BEGIN
        INSERT INTO messages_fts(messages_fts, rowid, subject, sender, body)
        VALUES ('delete', old.key, old.subject, old.sender, old.body);
    END;

    CREATE TRIGGER messages_au AFTER UPDATE OF subject, sender, body ON messages BEGIN
        INSERT INTO messages_fts(messages_fts, rowid, subject, sender, body)
        VALUES ('delete', old.key, old.subject, old.sender, old.body);
        INSERT INTO messages_fts(rowid, subject, sender, body)
        VALUES (new.key, new.subject, new.sender, new.body);
    END;

    CREATE TABLE sync_state (
        scope         TEXT PRIMARY KEY,
        last_sync     INTEGER NOT NULL,
        inserted      INTEGER NOT NULL DEFAULT 0,
        deleted       INTEGER NOT NULL DEFAULT 0,
        moved         INTEGER NOT NULL DEFAULT 0,
        skipped       INTEGER NOT NULL DEFAULT 0,
        last_error    TEXT,
        last_error_at INTEGER
    );
    ",
    // v2: attachment metadata, one row per attachment, removed with its
    // message.
    "
    CREATE TABLE attachments (
        message_key INTEGER NOT NULL REFERENCES messages(key) ON DELETE CASCADE,
        filename    TEXT NOT NULL,
        mime_type   TEXT NOT NULL DEFAULT 'application/octet-stream',
        size        INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX idx_attachments_message ON attachments(message_key);
    CREATE INDEX idx_attachments_filename ON attachments(filename);
    ",
];

/// Open (creating if needed) the writer connection and bring the schema up
/// to date.
pub fn open_writer(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IndexError::StoreCreate {
            path: db_path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    let existed = db_path.exists();
    let conn = Connection::open(db_path)?;
    if !existed {
        restrict_permissions(db_path);
    }
    configure(&conn)?;
    migrate(&conn)?;
    Ok(conn)
}

/// Open a read-only connection to an existing store.
pub fn open_reader(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // INSERT OR REPLACE must fire the FTS delete trigger for the row it
    // displaces, or the mirror keeps the replaced row's terms.
    conn.pragma_update(None, "recursive_triggers", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Apply pending migrations, each in its own transaction.
fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(IndexError::Migration {
            version: current,
            reason: format!("store is newer than this build (supports v{SCHEMA_VERSION})"),
        });
    }
    if current == SCHEMA_VERSION {
        debug!(version = current, "Store schema up to date");
        return Ok(());
    }

    for (idx, ddl) in MIGRATIONS.iter().enumerate() {
        let target = idx as i64 + 1;
        if target <= current {
            continue;
        }
        conn.execute_batch(&format!(
            "BEGIN; {ddl}; PRAGMA user_version = {target}; COMMIT;"
        ))
        .map_err(|e| IndexError::Migration {
            version: target,
            reason: e.to_string(),
        })?;
        info!(version = target, "Applied store migration");
    }
    Ok(())
}

/// New store files should not be group or world readable; message bodies
/// live inside.
fn restrict_permissions(db_path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))
        {
            tracing::warn!(path = %db_path.display(), error = %e, "Could not restrict store permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = db_path;
    }
}
