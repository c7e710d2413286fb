//! Attachment-name search over the indexed metadata.
//!
//! Attachments are matched by substring on the recorded file name, optionally
//! narrowed to an exact content type; content is never stored, so there is
//! nothing to full-text index here.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::model::{Attachment, MessageKey};

use super::{scope_filter, SearchOptions, MAX_LIMIT};

/// One attachment matched by name, joined with its message.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentHit {
    pub key: MessageKey,
    pub account: String,
    pub mailbox: String,
    pub sender: String,
    pub subject: String,
    pub date_received: DateTime<Utc>,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// Find attachments whose file name contains `name`, newest message first.
///
/// `mime_type` narrows to an exact `type/subtype` when given. The same
/// account/mailbox scoping and limit bounds as message search apply.
pub fn search_attachments(
    conn: &Connection,
    name: &str,
    mime_type: Option<&str>,
    opts: &SearchOptions,
) -> Result<Vec<AttachmentHit>> {
    if name.trim().is_empty() {
        return Err(IndexError::InvalidQuery);
    }
    if opts.limit == 0 || opts.limit > MAX_LIMIT {
        return Err(IndexError::InvalidLimit(opts.limit));
    }

    let (filter_sql, mut params) = scope_filter(opts);
    params.insert(0, Value::Text(format!("%{}%", escape_like(name.trim()))));
    let mut sql = format!(
        "SELECT m.key, m.account, m.mailbox, m.sender, m.subject,
                m.date_received, a.filename, a.mime_type, a.size
         FROM attachments a
         JOIN messages m ON m.key = a.message_key
         WHERE a.filename LIKE ?1 ESCAPE '\\'{filter_sql}"
    );
    if let Some(mt) = mime_type {
        params.push(Value::Text(mt.to_string()));
        sql.push_str(&format!(" AND a.mime_type = ?{}", params.len()));
    }
    params.push(Value::Integer(opts.limit as i64));
    sql.push_str(&format!(
        " ORDER BY m.date_received DESC, a.filename ASC LIMIT ?{}",
        params.len()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(AttachmentHit {
            key: MessageKey::from_i64(row.get(0)?),
            account: row.get(1)?,
            mailbox: row.get(2)?,
            sender: row.get(3)?,
            subject: row.get(4)?,
            date_received: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_default(),
            filename: row.get(6)?,
            mime_type: row.get(7)?,
            size: row.get::<_, i64>(8)? as u64,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// All attachment metadata recorded for one message, by file name.
pub fn attachments_for_message(conn: &Connection, key: MessageKey) -> Result<Vec<Attachment>> {
    let mut stmt = conn.prepare_cached(
        "SELECT filename, mime_type, size FROM attachments
         WHERE message_key = ?1
         ORDER BY filename",
    )?;
    let rows = stmt.query_map([key.as_i64()], |row| {
        Ok(Attachment {
            filename: row.get(0)?,
            mime_type: row.get(1)?,
            size: row.get::<_, i64>(2)? as u64,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Escape LIKE metacharacters so user input matches literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
