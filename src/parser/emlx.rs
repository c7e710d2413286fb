//! Parser for per-message `.emlx` files.
//!
//! An `.emlx` file is a decimal byte-count line, the embedded RFC 5322
//! message, and an XML property-list trailer carrying mail-client metadata
//! (most importantly a `flags` integer: bit 0 = read, bit 4 = flagged).
//!
//! The contract here is strict: given a path, return a fully indexable
//! [`MessageRecord`] or a classified [`SkipReason`]. No failure mode panics
//! or surfaces as a hard error; an unparseable file is simply absent from
//! the index until it changes.

use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tracing::debug;

use crate::error::SkipReason;
use crate::model::{Fingerprint, MessageKey, MessageRecord};
use crate::parser::mime;

/// Flags-word bit meaning "message has been read".
const FLAG_READ: i64 = 1;
/// Flags-word bit meaning "message is flagged".
const FLAG_FLAGGED: i64 = 1 << 4;

/// How many bytes of a file to scan when sniffing the Message-ID header.
const SNIFF_LEN: usize = 8 * 1024;

/// Parse one `.emlx` file into a [`MessageRecord`].
///
/// `max_size` is the whole-file cap (oversized files are rejected, not
/// truncated); `max_body` caps the plain-text body kept for indexing.
pub fn parse_emlx(
    path: &Path,
    account: &str,
    mailbox: &str,
    max_size: u64,
    max_body: usize,
) -> std::result::Result<MessageRecord, SkipReason> {
    let meta = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SkipReason::Vanished
        } else {
            SkipReason::Unreadable(e.to_string())
        }
    })?;

    if meta.len() > max_size {
        return Err(SkipReason::Oversize {
            size: meta.len(),
            cap: max_size,
        });
    }

    let fingerprint = Fingerprint::from_metadata(&meta);

    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SkipReason::Vanished
        } else {
            SkipReason::Unreadable(e.to_string())
        }
    })?;

    let (message_bytes, trailer) = split_emlx(&data);
    let flags = trailer.map(parse_flags_plist).unwrap_or(0);

    let parser = MessageParser::default();
    let parsed = parser.parse(message_bytes);

    let (sender, subject, date_received, message_id, mut body, attachments) = match &parsed {
        Some(msg) => (
            mime::format_sender(msg),
            msg.subject().unwrap_or("").to_string(),
            mime::message_date(msg),
            msg.message_id().map(str::to_string),
            mime::extract_body(msg).unwrap_or_default(),
            mime::list_attachments(msg),
        ),
        None => {
            // mail-parser gave up entirely; index what a raw split can give
            // us so the message is at least findable by body text.
            debug!(path = %path.display(), "Falling back to raw body extraction");
            let body = mime::extract_body_fallback(message_bytes);
            if body.trim().is_empty() && message_bytes.is_empty() {
                return Err(SkipReason::Malformed("empty message payload".into()));
            }
            (
                String::new(),
                String::new(),
                DateTime::<Utc>::UNIX_EPOCH,
                None,
                body,
                Vec::new(),
            )
        }
    };

    truncate_to_boundary(&mut body, max_body);

    Ok(MessageRecord {
        key: MessageKey::from_path(path),
        account: account.to_string(),
        mailbox: mailbox.to_string(),
        sender,
        subject,
        date_received,
        is_read: flags & FLAG_READ != 0,
        is_flagged: flags & FLAG_FLAGGED != 0,
        flags,
        message_id,
        body,
        attachments,
        path: path.to_path_buf(),
        fingerprint,
    })
}

/// Split raw `.emlx` bytes into (embedded message, optional plist trailer).
///
/// The first line holds the decimal byte count of the message. A missing or
/// garbled count line degrades to treating everything as the message.
fn split_emlx(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    let Some(eol) = data.iter().position(|&b| b == b'\n') else {
        return (data, None);
    };

    let count_line = std::str::from_utf8(&data[..eol])
        .ok()
        .map(str::trim)
        .unwrap_or("");

    let body_start = eol + 1;
    match count_line.parse::<usize>() {
        Ok(len) if body_start + len <= data.len() => {
            let message = &data[body_start..body_start + len];
            let rest = &data[body_start + len..];
            let trailer = if rest.iter().any(|&b| !b.is_ascii_whitespace()) {
                Some(rest)
            } else {
                None
            };
            (message, trailer)
        }
        // Count line absent or inconsistent with the actual size.
        _ => (data, None),
    }
}

/// Extract the `flags` integer from the plist trailer.
///
/// A full plist parser is overkill for one integer; the trailer is
/// machine-written and the `<key>flags</key><integer>N</integer>` pair is the
/// only thing we consume from it.
fn parse_flags_plist(trailer: &[u8]) -> i64 {
    let text = String::from_utf8_lossy(trailer);
    let Some(key_pos) = text.find("<key>flags</key>") else {
        return 0;
    };
    let after = &text[key_pos..];
    let Some(int_start) = after.find("<integer>") else {
        return 0;
    };
    let after = &after[int_start + "<integer>".len()..];
    let Some(int_end) = after.find("</integer>") else {
        return 0;
    };
    after[..int_end].trim().parse::<i64>().unwrap_or(0)
}

/// Read just enough of a message file to find its Message-ID header.
///
/// Used by the scanner as a content-identity hint for move detection; never
/// fails; any problem simply yields `None`.
pub fn sniff_message_id(path: &Path) -> Option<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let n = file.read(&mut buf).ok()?;
    buf.truncate(n);

    let text = String::from_utf8_lossy(&buf);
    for line in text.lines() {
        let Some(rest) = line
            .strip_prefix("Message-ID:")
            .or_else(|| line.strip_prefix("Message-Id:"))
            .or_else(|| line.strip_prefix("message-id:"))
        else {
            continue;
        };
        let id = rest.trim();
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    None
}

/// Truncate a string to at most `max` bytes on a char boundary.
fn truncate_to_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
