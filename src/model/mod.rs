//! Core data types: message records, inventory entries, mutations.

pub mod message;
pub mod mutation;

pub use message::{Attachment, Fingerprint, MessageKey, MessageRecord};
pub use mutation::{InventoryEntry, Mutation, SyncCounts};
