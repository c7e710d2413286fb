//! End-to-end tests for reconciliation, the index store, and search.

use std::path::{Path, PathBuf};

use mailindex::config::IndexingConfig;
use mailindex::index::{apply_mutations, IndexManager};
use mailindex::model::{Fingerprint, MessageKey, MessageRecord, Mutation};
use mailindex::scan::Scope;
use mailindex::search::{self, SearchOptions};
use mailindex::sync;

/// Write one `.emlx` file: count line, RFC 5322 message, plist trailer.
fn write_emlx(
    root: &Path,
    account: &str,
    mailbox: &str,
    name: &str,
    subject: &str,
    body: &str,
    message_id: &str,
    flags: i64,
) -> PathBuf {
    let dir = root.join(account).join(mailbox);
    std::fs::create_dir_all(&dir).unwrap();
    let message = format!(
        "From: Alice <alice@example.com>\r\n\
         Subject: {subject}\r\n\
         Date: Thu, 04 Jan 2024 10:00:00 +0000\r\n\
         Message-ID: {message_id}\r\n\
         \r\n\
         {body}\r\n"
    );
    let mut data = format!("{}\n", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    data.extend_from_slice(
        format!(
            "<?xml version=\"1.0\"?><plist version=\"1.0\"><dict>\
             <key>flags</key><integer>{flags}</integer></dict></plist>"
        )
        .as_bytes(),
    );
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn setup() -> (tempfile::TempDir, PathBuf, IndexManager, IndexingConfig) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("mail");
    std::fs::create_dir_all(&root).unwrap();
    let manager = IndexManager::open(&tmp.path().join("index.db")).unwrap();
    (tmp, root, manager, IndexingConfig::default())
}

fn opts(limit: usize) -> SearchOptions {
    SearchOptions {
        limit,
        ..SearchOptions::default()
    }
}

// ─── Sync: initial indexing and idempotence ─────────────────────────

#[test]
fn test_initial_sync_indexes_all_messages() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "First", "alpha body", "<1@e>", 0);
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Second", "beta body", "<2@e>", 1);
    write_emlx(&root, "acct", "Archive", "3.emlx", "Third", "gamma body", "<3@e>", 0);

    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.inserted, 3);
    assert_eq!(counts.deleted, 0);
    assert_eq!(counts.moved, 0);
    assert_eq!(counts.skipped, 0);

    let status = manager.status().unwrap();
    assert_eq!(status.message_count, 3);
    assert_eq!(status.mailbox_count, 2);
    assert_eq!(status.account_count, 1);
    assert!(status.last_sync.is_some());
}

#[test]
fn test_second_sync_is_a_no_op() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "First", "alpha", "<1@e>", 0);
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Second", "beta", "<2@e>", 0);

    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.total_changes(), 0);
    assert_eq!(counts.skipped, 0);
}

#[test]
fn test_duplicate_file_names_index_separately() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "Inbox copy", "inbox words", "<a@e>", 0);
    write_emlx(&root, "acct", "Archive", "1.emlx", "Archived copy", "archive words", "<b@e>", 0);

    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.inserted, 2);
    assert_eq!(manager.status().unwrap().message_count, 2);

    // Converged: repeated passes over an unchanged tree stay no-ops.
    for _ in 0..2 {
        let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
        assert_eq!(counts.total_changes(), 0);
        assert_eq!(counts.skipped, 0);
    }

    let conn = manager.read_conn().unwrap();
    assert_eq!(search::search(&conn, "inbox", &opts(10)).unwrap().len(), 1);
    assert_eq!(search::search(&conn, "archive", &opts(10)).unwrap().len(), 1);
    drop(conn);

    // Once the collision clears, the survivor converges back onto its
    // stem-derived key and the store settles again.
    std::fs::remove_file(root.join("acct/Archive/1.emlx")).unwrap();
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(manager.status().unwrap().message_count, 1);
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.total_changes(), 0);
}

#[test]
fn test_deleted_file_removed_from_index() {
    let (_tmp, root, manager, cfg) = setup();
    let path = write_emlx(&root, "acct", "INBOX", "1.emlx", "Doomed", "x", "<1@e>", 0);
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Survivor", "y", "<2@e>", 0);

    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    std::fs::remove_file(path).unwrap();
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.deleted, 1);
    assert_eq!(manager.status().unwrap().message_count, 1);
}

#[test]
fn test_modified_file_reindexed() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "Old subject", "old words", "<1@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    // Rewrite with different content; the size change alone flips the
    // fingerprint even within the same mtime second.
    write_emlx(
        &root, "acct", "INBOX", "1.emlx", "Entirely new subject", "replacement text body",
        "<1@e>", 0,
    );
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.inserted, 1);
    assert_eq!(counts.deleted, 0);

    let conn = manager.read_conn().unwrap();
    let hits = search::search(&conn, "replacement", &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].subject, "Entirely new subject");
}

// ─── Move and rename detection ──────────────────────────────────────

#[test]
fn test_move_across_mailboxes_is_one_move() {
    let (_tmp, root, manager, cfg) = setup();
    let old = write_emlx(&root, "acct", "INBOX", "42.emlx", "Travels", "migrating", "<42@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    let new_dir = root.join("acct").join("Archive");
    std::fs::create_dir_all(&new_dir).unwrap();
    std::fs::rename(&old, new_dir.join("42.emlx")).unwrap();

    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.moved, 1);
    assert_eq!(counts.inserted, 0);
    assert_eq!(counts.deleted, 0);

    let conn = manager.read_conn().unwrap();
    let hits = search::search(&conn, "migrating", &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].mailbox, "Archive");
}

#[test]
fn test_rename_paired_by_message_id() {
    let (_tmp, root, manager, cfg) = setup();
    let old = write_emlx(&root, "acct", "INBOX", "1.emlx", "Renamed", "sticky content", "<r@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    std::fs::rename(&old, old.with_file_name("9001.emlx")).unwrap();
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.moved, 1);
    assert_eq!(counts.inserted, 0);
    assert_eq!(counts.deleted, 0);
    assert_eq!(manager.status().unwrap().message_count, 1);
}

// ─── Skips ──────────────────────────────────────────────────────────

#[test]
fn test_oversize_file_skipped() {
    let (_tmp, root, manager, _) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "Huge", &"x".repeat(4096), "<1@e>", 0);
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Small", "tiny", "<2@e>", 0);

    let cfg = IndexingConfig {
        max_message_size: 1024,
        ..IndexingConfig::default()
    };
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.inserted, 1);
    assert_eq!(manager.status().unwrap().message_count, 1);
}

// ─── Scoped sync ────────────────────────────────────────────────────

#[test]
fn test_scoped_sync_leaves_other_accounts_alone() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct-1", "INBOX", "1.emlx", "One", "a", "<1@e>", 0);
    write_emlx(&root, "acct-2", "INBOX", "2.emlx", "Two", "b", "<2@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    // acct-2's file disappears, but we only sync acct-1.
    std::fs::remove_file(root.join("acct-2/INBOX/2.emlx")).unwrap();
    let scope = Scope {
        account: Some("acct-1".into()),
        mailbox: None,
    };
    let counts = sync::sync_scope(&manager, &root, &scope, &cfg, None).unwrap();
    assert_eq!(counts.total_changes(), 0);
    assert_eq!(manager.status().unwrap().message_count, 2);

    // A full sync catches the deletion.
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.deleted, 1);
}

// ─── Rebuild ────────────────────────────────────────────────────────

#[test]
fn test_rebuild_from_scratch() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "Kept", "alpha", "<1@e>", 0);
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Also kept", "beta", "<2@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    let counts = sync::rebuild_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.inserted, 2);
    assert_eq!(manager.status().unwrap().message_count, 2);
}

// ─── Search round trips ─────────────────────────────────────────────

#[test]
fn test_search_after_sync_round_trip() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(
        &root, "acct", "INBOX", "1.emlx", "Invoice overdue",
        "the payment deadline has passed", "<inv@e>", 17,
    );
    write_emlx(&root, "acct", "INBOX", "2.emlx", "Lunch", "sandwiches at noon", "<l@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    let conn = manager.read_conn().unwrap();
    let hits = search::search(&conn, "deadline", &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.subject, "Invoice overdue");
    assert!(hit.is_read);
    assert!(hit.is_flagged);
    assert!(hit.excerpt.contains("[deadline]"));
}

#[test]
fn test_search_with_special_characters_end_to_end() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(
        &root, "acct", "INBOX", "1.emlx", "meeting-notes attached",
        "see the meeting-notes file", "<m@e>", 0,
    );
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    let conn = manager.read_conn().unwrap();
    for query in ["meeting-notes", "meet*", "\"meeting-notes\"", "(broken"] {
        let hits = search::search(&conn, query, &opts(10));
        assert!(hits.is_ok(), "query {query:?} should not error");
    }
    let hits = search::search(&conn, "meeting-notes", &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_attachment_search_round_trip() {
    let (_tmp, root, manager, cfg) = setup();
    let dir = root.join("acct").join("INBOX");
    std::fs::create_dir_all(&dir).unwrap();
    let message = "From: Alice <alice@example.com>\r\n\
         Subject: Numbers attached\r\n\
         Date: Thu, 04 Jan 2024 10:00:00 +0000\r\n\
         Message-ID: <att@e>\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
         \r\n\
         --XYZ\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         see the spreadsheet\r\n\
         --XYZ\r\n\
         Content-Type: application/pdf; name=\"q3-report.pdf\"\r\n\
         Content-Disposition: attachment; filename=\"q3-report.pdf\"\r\n\
         \r\n\
         %PDF-1.4 fake\r\n\
         --XYZ--\r\n";
    let mut data = format!("{}\n", message.len()).into_bytes();
    data.extend_from_slice(message.as_bytes());
    std::fs::write(dir.join("7.emlx"), data).unwrap();
    write_emlx(&root, "acct", "INBOX", "8.emlx", "No attachment", "plain", "<p@e>", 0);

    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    let conn = manager.read_conn().unwrap();
    let hits = search::search_attachments(&conn, "q3", None, &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filename, "q3-report.pdf");
    assert_eq!(hits[0].mime_type, "application/pdf");
    assert_eq!(hits[0].subject, "Numbers attached");

    // Type filter excludes it; listing by message key finds it.
    assert!(search::search_attachments(&conn, "q3", Some("image/png"), &opts(10))
        .unwrap()
        .is_empty());
    let listed = search::attachments_for_message(&conn, hits[0].key).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, "q3-report.pdf");
    assert!(search::attachments_for_message(&conn, MessageKey(8))
        .unwrap()
        .is_empty());
}

// ─── Reads during writes ────────────────────────────────────────────

#[test]
fn test_status_readable_while_writer_busy() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "One", "a", "<1@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();

    manager
        .with_writer(|_conn| {
            // Reads must not need the writer lock.
            let status = manager.status()?;
            assert_eq!(status.message_count, 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_failed_sync_marks_status_degraded() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "One", "a", "<1@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert!(manager.status().unwrap().last_error.is_none());

    let missing = root.join("gone");
    sync::sync_scope(&manager, &missing, &Scope::all(), &cfg, None).unwrap_err();

    let status = manager.status().unwrap();
    assert!(status.last_error.is_some());
    assert!(status.last_error_at.is_some());
    // A later successful sync clears the marker.
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert!(manager.status().unwrap().last_error.is_none());
}

#[test]
fn test_failed_batch_leaves_store_untouched() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "First", "alpha", "<1@e>", 0);
    let second = write_emlx(&root, "acct", "INBOX", "2.emlx", "Second", "beta", "<2@e>", 0);
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    let before = manager.status().unwrap();

    // A valid insert followed by a move onto an already-occupied path: the
    // second mutation trips the path uniqueness constraint, so the whole
    // batch must roll back, including the insert that preceded it.
    let ghost = MessageRecord {
        key: MessageKey(99),
        account: "acct".into(),
        mailbox: "INBOX".into(),
        sender: "ghost@example.com".into(),
        subject: "Phantom".into(),
        date_received: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        is_read: false,
        is_flagged: false,
        flags: 0,
        message_id: Some("<ghost@e>".into()),
        body: "spectral words".into(),
        attachments: Vec::new(),
        path: root.join("acct/INBOX/99.emlx"),
        fingerprint: Fingerprint {
            mtime_secs: 1_700_000_000,
            size: 64,
        },
    };
    let batch = vec![
        Mutation::Insert(Box::new(ghost)),
        Mutation::UpdatePath {
            key: MessageKey(1),
            new_path: second.clone(),
            new_account: "acct".into(),
            new_mailbox: "INBOX".into(),
            fingerprint: Fingerprint {
                mtime_secs: 1_700_000_000,
                size: 64,
            },
        },
    ];
    manager
        .with_writer(|conn| apply_mutations(conn, &Scope::all(), &batch, 0))
        .unwrap_err();

    let after = manager.status().unwrap();
    assert_eq!(after.message_count, 2);
    assert_eq!(after.last_sync, before.last_sync);

    let conn = manager.read_conn().unwrap();
    assert!(search::search(&conn, "spectral", &opts(10)).unwrap().is_empty());
    let hits = search::search(&conn, "alpha", &opts(10)).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].key == MessageKey(1));
}

#[test]
fn test_concurrent_syncs_apply_sequentially() {
    let (_tmp, root, manager, cfg) = setup();
    for i in 0..20 {
        write_emlx(
            &root, "acct", "INBOX", &format!("{i}.emlx"),
            &format!("Message {i}"), "shared body", &format!("<{i}@e>"), 0,
        );
    }

    std::thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap());
        }
    });

    // Racing syncs must converge on the same state as one sequential pass.
    assert_eq!(manager.status().unwrap().message_count, 20);
    let counts = sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert_eq!(counts.total_changes(), 0);
}

#[test]
fn test_staleness_after_sync() {
    let (_tmp, root, manager, cfg) = setup();
    write_emlx(&root, "acct", "INBOX", "1.emlx", "One", "a", "<1@e>", 0);
    assert!(manager.is_stale(24.0).unwrap());
    sync::sync_scope(&manager, &root, &Scope::all(), &cfg, None).unwrap();
    assert!(!manager.is_stale(24.0).unwrap());
}
