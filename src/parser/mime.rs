//! MIME body extraction and HTML-to-text reduction.

use chrono::{DateTime, Utc};
use mail_parser::Message;

use crate::model::Attachment;

/// Extract the plain-text body for indexing.
///
/// Prefers the `text/plain` part; when only HTML is present it is reduced to
/// plain text. Unparseable markup degrades to tag stripping, never to a
/// failed record.
pub fn extract_body(msg: &Message<'_>) -> Option<String> {
    msg.body_text(0)
        .map(|s| s.into_owned())
        .or_else(|| msg.body_html(0).map(|html| html_to_text(&html)))
}

/// Format the first `From:` address as `Display Name <address>`.
pub fn format_sender(msg: &Message<'_>) -> String {
    let Some(addr) = msg.from().and_then(|a| a.first()) else {
        return String::new();
    };
    let address = addr.address().unwrap_or("");
    match addr.name() {
        Some(name) if !name.is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    }
}

/// The received timestamp from the `Date:` header (Unix epoch fallback).
pub fn message_date(msg: &Message<'_>) -> DateTime<Utc> {
    msg.date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// List attachment metadata from a parsed message without decoding content
/// beyond what `mail-parser` already did.
pub fn list_attachments(msg: &Message<'_>) -> Vec<Attachment> {
    use mail_parser::MimeHeaders;

    let mut result = Vec::new();
    for (idx, part) in msg.attachments().enumerate() {
        let filename = part
            .attachment_name()
            .map(String::from)
            .unwrap_or_else(|| format!("attachment_{idx}"));

        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{sub}", ct.ctype()),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        result.push(Attachment {
            filename,
            mime_type,
            size: part.contents().len() as u64,
        });
    }
    result
}

/// Fallback body extraction when `mail-parser` cannot parse the message:
/// everything after the first blank line, lossily decoded.
pub fn extract_body_fallback(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if let Some(pos) = text.find("\n\n") {
        text[pos + 2..].to_string()
    } else if let Some(pos) = text.find("\r\n\r\n") {
        text[pos + 4..].to_string()
    } else {
        String::new()
    }
}

/// Reduce HTML to plain text suitable for full-text indexing.
///
/// - Removes script and style blocks
/// - Converts block elements and `<br>` to newlines
/// - Strips all remaining tags
/// - Decodes common HTML entities
/// - Collapses runs of blank lines
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        text = text.replace(&format!("</{tag}>"), "\n");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    // Strip all remaining tags
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    // Decode HTML entities
    result = result.replace("&amp;", "&");
    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&#39;", "'");
    result = result.replace("&apos;", "'");
    result = result.replace("&nbsp;", " ");
    result = result.replace("&#160;", " ");

    // Collapse multiple blank lines into at most one
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`).
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    while let Some(start) = remaining.to_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        if let Some(end) = after.to_lowercase().find(&close) {
            remaining = &after[end + close.len()..];
        } else {
            // No closing tag — remove rest
            remaining = "";
            break;
        }
    }
    result.push_str(remaining);
    result
}
