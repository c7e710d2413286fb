//! Message-file reading: .emlx framing, MIME body extraction, HTML reduction.

pub mod emlx;
pub mod mime;

pub use emlx::{parse_emlx, sniff_message_id};
