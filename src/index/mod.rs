//! Searchable store: SQLite schema, lifecycle management, and the
//! single-writer mutation path.

pub mod inventory;
pub mod manager;
pub mod schema;
pub mod writer;

pub use inventory::store_inventory;
pub use manager::{IndexManager, IndexStatus};
pub use writer::apply_mutations;
