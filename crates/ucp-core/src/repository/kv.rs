use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use super::RepoResult;
use crate::errors::{ExError, ExErrorKind};

/// Key-value storage backing the `local_storage` capability
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: Value) -> RepoResult<()>;

    fn get(&self, key: &str) -> RepoResult<Option<Value>>;

    /// Remove `key`; returns whether it existed
    fn delete(&self, key: &str) -> RepoResult<bool>;

    /// Atomically add `by` to the integer at `key` (missing or non-numeric
    /// counts as 0), returning `(previous, new)`
    fn increment(&self, key: &str, by: i64) -> RepoResult<(i64, i64)>;
}

/// Interpret a stored value as a counter
pub fn as_counter(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> ExError {
        ExError::new(ExErrorKind::Concurrency)
            .with_op("kv_store")
            .with_message("kv store lock poisoned")
    }
}

impl KvStore for InMemoryKvStore {
    fn put(&self, key: &str, value: Value) -> RepoResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> RepoResult<Option<Value>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> RepoResult<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn increment(&self, key: &str, by: i64) -> RepoResult<(i64, i64)> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let previous = as_counter(entries.get(key));
        let next = previous.saturating_add(by);
        entries.insert(key.to_string(), Value::from(next));
        Ok((previous, next))
    }
}
