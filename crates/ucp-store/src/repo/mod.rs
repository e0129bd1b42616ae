//! Repository layer
//!
//! Implements the ucp-core repository traits over SQLite.

mod kv_store;
mod receipt_repo;
mod template_repo;

pub use kv_store::SqliteKvStore;
pub use receipt_repo::{ReceiptRepo, ReceiptSummary};
pub use template_repo::SqliteTemplateRepo;
