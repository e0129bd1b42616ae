//! SQLite key-value store for the `local_storage` capability

#![allow(clippy::result_large_err)]

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::db;
use crate::errors::{from_rusqlite, from_serde, lock_poisoned, Result};
use ucp_core::repository::kv::as_counter;
use ucp_core::KvStore;

/// Values are stored as JSON text, one row per key
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Wrap a connection whose schema is already migrated
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(db::open_migrated(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(db::open_in_memory_migrated()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| lock_poisoned("kv_store"))
    }
}

fn read(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let text: Option<String> = conn
        .query_row("SELECT value FROM kv_entries WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(from_rusqlite)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| from_serde("kv_entries.value", e)))
        .transpose()
}

fn write(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let text = serde_json::to_string(value).map_err(|e| from_serde("kv_entries.value", e))?;
    conn.execute(
        "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, text, chrono::Utc::now().timestamp_millis()],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

impl KvStore for SqliteKvStore {
    fn put(&self, key: &str, value: Value) -> Result<()> {
        write(&*self.conn()?, key, &value)
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        read(&*self.conn()?, key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM kv_entries WHERE key = ?1", [key])
            .map_err(from_rusqlite)?;
        Ok(deleted > 0)
    }

    fn increment(&self, key: &str, by: i64) -> Result<(i64, i64)> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so another process cannot
        // read the same previous value
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(from_rusqlite)?;
        let previous = as_counter(read(&tx, key)?.as_ref());
        let next = previous.saturating_add(by);
        write(&tx, key, &Value::from(next))?;
        tx.commit().map_err(from_rusqlite)?;
        Ok((previous, next))
    }
}
