//! UCP Store - SQLite persistence
//!
//! Provides:
//! - SQLite schema with a checksummed migrations framework
//! - `SqliteTemplateRepo`: templates with atomic cache counters
//! - `SqliteKvStore`: durable backing for the `local_storage` capability
//! - `ReceiptRepo`: exported receipt documents, verified on read

pub mod db;
pub mod errors;
pub mod migrations;
pub mod repo;

// Re-export key types
pub use errors::Result;
pub use repo::{ReceiptRepo, SqliteKvStore, SqliteTemplateRepo};
