//! `mailindex` — an indexing and reconciliation engine for on-disk mail
//! stores.
//!
//! This crate scans trees of per-message `.emlx` files, reconciles them
//! against a SQLite full-text index under single-writer discipline, and
//! serves ranked searches. An optional filesystem watcher keeps the index
//! converged while the store changes underneath it.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod parser;
pub mod scan;
pub mod search;
pub mod sync;
pub mod watch;
