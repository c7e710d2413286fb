//! Ranked full-text search over the index.
//!
//! Queries run on read-only connections against the FTS5 mirror, ranked by
//! bm25 with recency as the tiebreak. A query the FTS5 parser rejects even
//! after sanitization is retried once with every term quoted; if that also
//! fails the search degrades to no results rather than an error.

pub mod attachments;
pub mod sanitize;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::model::MessageKey;

pub use attachments::{attachments_for_message, search_attachments, AttachmentHit};
pub use sanitize::{escape_all_special, sanitize_fts_query};

/// Upper bound on the per-query result limit.
pub const MAX_LIMIT: usize = 500;

/// Optional narrowing of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub account: Option<String>,
    pub mailbox: Option<String>,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub key: MessageKey,
    pub account: String,
    pub mailbox: String,
    pub sender: String,
    pub subject: String,
    pub date_received: DateTime<Utc>,
    pub is_read: bool,
    pub is_flagged: bool,
    /// Relevance; higher is better.
    pub score: f64,
    /// Body excerpt around the match, with `[`/`]` marking matched terms.
    pub excerpt: String,
}

/// Execute a ranked search. Rejects empty queries and out-of-range limits
/// before touching the store.
pub fn search(conn: &Connection, raw_query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
    if raw_query.trim().is_empty() {
        return Err(IndexError::InvalidQuery);
    }
    if opts.limit == 0 || opts.limit > MAX_LIMIT {
        return Err(IndexError::InvalidLimit(opts.limit));
    }

    let sanitized = sanitize_fts_query(raw_query);
    match run_match(conn, &sanitized, opts) {
        Ok(hits) => Ok(hits),
        Err(e) if is_fts_syntax_error(&e) => {
            let fallback = escape_all_special(raw_query);
            debug!(query = raw_query, fallback, "Retrying with aggressive quoting");
            match run_match(conn, &fallback, opts) {
                Ok(hits) => Ok(hits),
                Err(e) if is_fts_syntax_error(&e) => {
                    warn!(query = raw_query, "Query unparseable even after quoting");
                    Ok(Vec::new())
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Count matches without materializing rows.
pub fn count_matches(conn: &Connection, raw_query: &str, opts: &SearchOptions) -> Result<u64> {
    if raw_query.trim().is_empty() {
        return Err(IndexError::InvalidQuery);
    }
    let sanitized = sanitize_fts_query(raw_query);
    let (filter_sql, mut params) = scope_filter(opts);
    params.insert(0, Value::Text(sanitized));
    let sql = format!(
        "SELECT COUNT(*)
         FROM messages_fts
         JOIN messages m ON m.key = messages_fts.rowid
         WHERE messages_fts MATCH ?1{filter_sql}"
    );
    let count: i64 = match conn.query_row(&sql, rusqlite::params_from_iter(params), |r| r.get(0)) {
        Ok(n) => n,
        Err(e) if is_fts_syntax_error(&e) => 0,
        Err(e) => return Err(e.into()),
    };
    Ok(count as u64)
}

fn run_match(
    conn: &Connection,
    match_expr: &str,
    opts: &SearchOptions,
) -> std::result::Result<Vec<SearchHit>, rusqlite::Error> {
    let (filter_sql, mut params) = scope_filter(opts);
    params.insert(0, Value::Text(match_expr.to_string()));
    params.push(Value::Integer(opts.limit as i64));
    let limit_pos = params.len();

    // bm25 ranks best matches most negative; recency breaks ties.
    let sql = format!(
        "SELECT m.key, m.account, m.mailbox, m.sender, m.subject,
                m.date_received, m.is_read, m.is_flagged,
                bm25(messages_fts) AS rank,
                snippet(messages_fts, 2, '[', ']', '…', 12) AS excerpt
         FROM messages_fts
         JOIN messages m ON m.key = messages_fts.rowid
         WHERE messages_fts MATCH ?1{filter_sql}
         ORDER BY rank ASC, m.date_received DESC
         LIMIT ?{limit_pos}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok(SearchHit {
            key: MessageKey::from_i64(row.get(0)?),
            account: row.get(1)?,
            mailbox: row.get(2)?,
            sender: row.get(3)?,
            subject: row.get(4)?,
            date_received: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_default(),
            is_read: row.get(6)?,
            is_flagged: row.get(7)?,
            score: -row.get::<_, f64>(8)?,
            excerpt: row.get(9)?,
        })
    })?;
    rows.collect()
}

/// Build the optional account/mailbox filter clause and its parameters.
/// Parameter numbering starts at ?2; ?1 is always the MATCH expression.
fn scope_filter(opts: &SearchOptions) -> (String, Vec<Value>) {
    let mut sql = String::new();
    let mut params: Vec<Value> = Vec::new();
    let mut next = 2;
    if let Some(ref account) = opts.account {
        sql.push_str(&format!(" AND m.account = ?{next}"));
        params.push(Value::Text(account.clone()));
        next += 1;
    }
    if let Some(ref mailbox) = opts.mailbox {
        sql.push_str(&format!(
            " AND (m.mailbox = ?{next} OR m.mailbox LIKE ?{next} || '/%')"
        ));
        params.push(Value::Text(mailbox.clone()));
    }
    (sql, params)
}

fn is_fts_syntax_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) => {
            err.code == ErrorCode::Unknown
                && msg
                    .as_deref()
                    .is_some_and(|m| m.contains("fts5") || m.contains("MATCH"))
        }
        _ => false,
    }
}
