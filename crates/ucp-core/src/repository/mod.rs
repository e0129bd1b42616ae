//! Repository contracts and in-memory implementations
//!
//! The template repository is the only state shared across runs; its
//! counters are only ever changed through atomic increment operations.

pub mod kv;
pub mod template;

use crate::errors::ExError;

/// Result type for repository operations
pub type RepoResult<T> = std::result::Result<T, ExError>;

pub use kv::{InMemoryKvStore, KvStore};
pub use template::{InMemoryTemplateRepo, TemplateRepository};
