//! SQLite template repository
//!
//! Counter updates are single `UPDATE ... RETURNING` statements, so
//! concurrent instantiations and runs never lose increments, even across
//! processes sharing the database file.

#![allow(clippy::result_large_err)]

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::db;
use crate::errors::{from_rusqlite, from_serde, lock_poisoned, Result};
use ucp_core::errors::{ExError, UcpError};
use ucp_core::model::{PacketBody, Template};
use ucp_core::TemplateRepository;

const TEMPLATE_COLUMNS: &str = "id, name, intent_description, packet_body, \
     baseline_prompt_tokens, baseline_completion_tokens, reuse_count, run_count, \
     created_at, last_used_at, category, tags";

pub struct SqliteTemplateRepo {
    conn: Mutex<Connection>,
}

impl SqliteTemplateRepo {
    /// Wrap a connection whose schema is already migrated
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (and migrate) the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(db::open_migrated(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(db::open_in_memory_migrated()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| lock_poisoned("template_repo"))
    }

    fn increment(&self, id: &str, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<u64> {
        let conn = self.conn()?;
        let value: Option<i64> = conn
            .query_row(sql, params, |row| row.get(0))
            .optional()
            .map_err(from_rusqlite)?;
        let value = value.ok_or_else(|| not_found(id))?;
        Ok(u64::try_from(value).unwrap_or(0))
    }
}

fn not_found(id: &str) -> ExError {
    UcpError::TemplateNotFound {
        template_id: id.to_string(),
    }
    .into()
}

fn to_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Raw column values, decoded outside the rusqlite row callback so JSON
/// failures surface as serialization errors
struct TemplateRow {
    id: String,
    name: String,
    intent_description: String,
    packet_body: String,
    baseline_prompt_tokens: i64,
    baseline_completion_tokens: i64,
    reuse_count: i64,
    run_count: i64,
    created_at: i64,
    last_used_at: Option<i64>,
    category: Option<String>,
    tags: String,
}

impl TemplateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            intent_description: row.get(2)?,
            packet_body: row.get(3)?,
            baseline_prompt_tokens: row.get(4)?,
            baseline_completion_tokens: row.get(5)?,
            reuse_count: row.get(6)?,
            run_count: row.get(7)?,
            created_at: row.get(8)?,
            last_used_at: row.get(9)?,
            category: row.get(10)?,
            tags: row.get(11)?,
        })
    }

    fn into_template(self) -> Result<Template> {
        let packet_body: PacketBody =
            serde_json::from_str(&self.packet_body).map_err(|e| from_serde("packet_body", e))?;
        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|e| from_serde("tags", e))?;
        let count = |v: i64| u64::try_from(v).unwrap_or(0);

        Ok(Template {
            id: self.id,
            name: self.name,
            intent_description: self.intent_description,
            packet_body,
            baseline_prompt_tokens: count(self.baseline_prompt_tokens),
            baseline_completion_tokens: count(self.baseline_completion_tokens),
            reuse_count: count(self.reuse_count),
            run_count: count(self.run_count),
            created_at: from_millis(self.created_at),
            last_used_at: self.last_used_at.map(from_millis),
            category: self.category,
            tags,
        })
    }
}

impl TemplateRepository for SqliteTemplateRepo {
    fn insert(&self, template: Template) -> Result<()> {
        let packet_body =
            serde_json::to_string(&template.packet_body).map_err(|e| from_serde("packet_body", e))?;
        let tags = serde_json::to_string(&template.tags).map_err(|e| from_serde("tags", e))?;
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT INTO templates (id, name, intent_description, packet_body,
                    baseline_prompt_tokens, baseline_completion_tokens, reuse_count, run_count,
                    created_at, last_used_at, category, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    template.id,
                    template.name,
                    template.intent_description,
                    packet_body,
                    as_i64(template.baseline_prompt_tokens),
                    as_i64(template.baseline_completion_tokens),
                    as_i64(template.reuse_count),
                    as_i64(template.run_count),
                    to_millis(&template.created_at),
                    template.last_used_at.as_ref().map(to_millis),
                    template.category,
                    tags,
                ],
            )
            .map_err(from_rusqlite)?;

        if inserted == 0 {
            return Err(UcpError::TemplateAlreadyExists {
                template_id: template.id,
            }
            .into());
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Template>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1"),
                [id],
                TemplateRow::from_row,
            )
            .optional()
            .map_err(from_rusqlite)?;
        drop(conn);
        row.map(TemplateRow::into_template).transpose()
    }

    fn list(&self) -> Result<Vec<Template>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY created_at DESC, rowid DESC"
            ))
            .map_err(from_rusqlite)?;
        let rows = stmt
            .query_map([], TemplateRow::from_row)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    fn increment_reuse_count(&self, id: &str) -> Result<u64> {
        self.increment(
            id,
            "UPDATE templates SET reuse_count = reuse_count + 1 WHERE id = ?1
             RETURNING reuse_count",
            rusqlite::params![id],
        )
    }

    fn record_run(&self, id: &str, at: DateTime<Utc>) -> Result<u64> {
        self.increment(
            id,
            "UPDATE templates SET run_count = run_count + 1, last_used_at = ?2 WHERE id = ?1
             RETURNING run_count",
            rusqlite::params![id, to_millis(&at)],
        )
    }
}

impl std::fmt::Debug for SqliteTemplateRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTemplateRepo").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ucp_core::model::TemplateRegistration;
    use ucp_core::rules::{validate_body, ValidationOptions};
    use ucp_core::ExErrorKind;

    fn template(id: &str) -> Template {
        let body = json!({
            "protocol_version": "0.1",
            "ttl_seconds": 60,
            "required_capabilities": ["transform"],
            "declared_permissions": [],
            "metadata": {"name": "t", "owner": "o"},
            "operations": [{"op_name": "transform.set", "arguments": {"value": 1}}]
        });
        let packet_body = validate_body(&body, &ValidationOptions::default()).unwrap();
        let registration = TemplateRegistration {
            name: format!("template {id}"),
            intent_description: "test".to_string(),
            packet_body: body,
            baseline_prompt_tokens: 500,
            baseline_completion_tokens: 200,
            category: Some("ops".to_string()),
            tags: vec!["a".to_string(), "b".to_string()],
        };
        Template::new(id.to_string(), registration, packet_body)
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let repo = SqliteTemplateRepo::open_in_memory().unwrap();
        let original = template("tpl-1");
        repo.insert(original.clone()).unwrap();

        let loaded = repo.get("tpl-1").unwrap().unwrap();
        assert_eq!(loaded.packet_body, original.packet_body);
        assert_eq!(loaded.tags, original.tags);
        assert_eq!(loaded.category, original.category);
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            original.created_at.timestamp_millis()
        );
        assert!(repo.get("tpl-missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let repo = SqliteTemplateRepo::open_in_memory().unwrap();
        repo.insert(template("tpl-1")).unwrap();
        let err = repo.insert(template("tpl-1")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::AlreadyExists);
    }

    #[test]
    fn test_counters_are_independent() {
        let repo = SqliteTemplateRepo::open_in_memory().unwrap();
        repo.insert(template("tpl-1")).unwrap();

        assert_eq!(repo.increment_reuse_count("tpl-1").unwrap(), 1);
        assert_eq!(repo.increment_reuse_count("tpl-1").unwrap(), 2);
        assert_eq!(repo.record_run("tpl-1", Utc::now()).unwrap(), 1);

        let loaded = repo.get("tpl-1").unwrap().unwrap();
        assert_eq!(loaded.reuse_count, 2);
        assert_eq!(loaded.run_count, 1);
        assert!(loaded.last_used_at.is_some());
    }

    #[test]
    fn test_increment_unknown_template() {
        let repo = SqliteTemplateRepo::open_in_memory().unwrap();
        let err = repo.increment_reuse_count("nope").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
        let err = repo.record_run("nope", Utc::now()).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }
}
