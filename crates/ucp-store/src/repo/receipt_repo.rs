//! Receipt persistence
//!
//! Receipts are stored as their exported JSON document. Every read
//! re-verifies `receipt_hash` against the stored document, so a row edited
//! behind the repository's back is reported as an integrity violation
//! instead of being returned.

#![allow(clippy::result_large_err)]

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::db;
use crate::errors::{from_rusqlite, from_serde, lock_poisoned, Result};
use ucp_core::errors::{ExError, ExErrorKind};
use ucp_core::receipt::verify_receipt_value;
use ucp_core::Receipt;

/// Index columns of a stored receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub receipt_id: String,
    pub packet_id: String,
    pub status: String,
    pub cache_status: String,
    pub template_id: Option<String>,
    pub started_at: u64,
    pub finished_at: u64,
}

pub struct ReceiptRepo {
    conn: Mutex<Connection>,
}

fn label(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl ReceiptRepo {
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
        self.conn.lock().map_err(|_| lock_poisoned("receipt_repo"))
    }

    /// Store a receipt; a receipt id can only be written once
    pub fn save(&self, receipt: &Receipt) -> Result<()> {
        let document = serde_json::to_value(receipt).map_err(|e| from_serde("document", e))?;
        let text = serde_json::to_string(&document).map_err(|e| from_serde("document", e))?;
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

        let inserted = self
            .conn()?
            .execute(
                "INSERT INTO receipts (receipt_id, packet_id, status, cache_status, template_id,
                    receipt_hash, started_at, finished_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(receipt_id) DO NOTHING",
                rusqlite::params![
                    receipt.receipt_id,
                    receipt.packet_id,
                    label(&document, "status"),
                    label(&document, "cache_status"),
                    receipt.template_id,
                    receipt.receipt_hash,
                    as_i64(receipt.started_at),
                    as_i64(receipt.finished_at),
                    text,
                ],
            )
            .map_err(from_rusqlite)?;

        if inserted == 0 {
            return Err(ExError::new(ExErrorKind::AlreadyExists)
                .with_op("receipt_save")
                .with_packet_id(receipt.packet_id.clone())
                .with_message(format!("Receipt already stored: {}", receipt.receipt_id)));
        }
        tracing::debug!(receipt_id = %receipt.receipt_id, "receipt stored");
        Ok(())
    }

    /// Load and verify a receipt
    ///
    /// ## Errors
    ///
    /// Returns `IntegrityViolation` if the stored document no longer matches
    /// its `receipt_hash`.
    pub fn get(&self, receipt_id: &str) -> Result<Option<Receipt>> {
        let text: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM receipts WHERE receipt_id = ?1",
                [receipt_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(from_rusqlite)?;
        let Some(text) = text else {
            return Ok(None);
        };

        let document: Value =
            serde_json::from_str(&text).map_err(|e| from_serde("document", e))?;
        verify_receipt_value(&document)
            .map_err(|e| ExError::from(e).with_op("receipt_load"))?;
        let receipt = serde_json::from_value(document).map_err(|e| from_serde("document", e))?;
        Ok(Some(receipt))
    }

    /// Summaries, newest first, optionally for one packet
    pub fn list(&self, packet_id: Option<&str>, limit: usize) -> Result<Vec<ReceiptSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT receipt_id, packet_id, status, cache_status, template_id,
                        started_at, finished_at
                 FROM receipts
                 WHERE ?1 IS NULL OR packet_id = ?1
                 ORDER BY started_at DESC, rowid DESC
                 LIMIT ?2",
            )
            .map_err(from_rusqlite)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![packet_id, limit], |row| {
                let started_at: i64 = row.get(5)?;
                let finished_at: i64 = row.get(6)?;
                Ok(ReceiptSummary {
                    receipt_id: row.get(0)?,
                    packet_id: row.get(1)?,
                    status: row.get(2)?,
                    cache_status: row.get(3)?,
                    template_id: row.get(4)?,
                    started_at: u64::try_from(started_at).unwrap_or(0),
                    finished_at: u64::try_from(finished_at).unwrap_or(0),
                })
            })
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(rows)
    }
}

impl std::fmt::Debug for ReceiptRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptRepo").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucp_core::economics::avoided_cost;
    use ucp_core::model::{CacheStatus, OpStatus, RunStatus, TokenPricing};
    use ucp_core::rules::{validate, ValidationOptions};
    use ucp_core::{build_receipt, CacheAnnotation, LedgerSnapshot, OperationResult, RunOutcome};

    fn receipt(packet_id: &str, started_at: u64) -> Receipt {
        receipt_with(packet_id, started_at, CacheAnnotation::none(TokenPricing::default()))
    }

    fn receipt_with(packet_id: &str, started_at: u64, annotation: CacheAnnotation) -> Receipt {
        let packet = validate(
            &serde_json::json!({
                "protocol_version": "0.1",
                "id": packet_id,
                "ttl_seconds": 60,
                "required_capabilities": ["transform"],
                "declared_permissions": [],
                "metadata": {"name": "n", "owner": "o"},
                "operations": [{"op_name": "transform.set", "arguments": {"value": 1}}]
            }),
            &ValidationOptions::default(),
        )
        .unwrap();
        let outcome = RunOutcome {
            status: RunStatus::Success,
            failure: None,
            started_at,
            finished_at: started_at + 5,
            operation_results: vec![OperationResult::Standard {
                path: "operations[0]".to_string(),
                id: None,
                op_name: "transform.set".to_string(),
                status: OpStatus::Ok,
                started_at,
                finished_at: started_at + 5,
                output: Some(serde_json::json!({"value": 1})),
                error: None,
                skip_reason: None,
            }],
            ledger: LedgerSnapshot::default(),
        };
        build_receipt(&packet, outcome, annotation).unwrap()
    }

    #[test]
    fn test_save_and_get_verified() {
        let repo = ReceiptRepo::open_in_memory().unwrap();
        let original = receipt("pkt-1", 1_000);
        repo.save(&original).unwrap();

        let loaded = repo.get(&original.receipt_id).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(repo.get("missing").unwrap().is_none());

        let err = repo.save(&original).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::AlreadyExists);
    }

    #[test]
    fn test_hit_receipt_with_fractional_cost_reloads() {
        let repo = ReceiptRepo::open_in_memory().unwrap();
        let pricing = TokenPricing::default();
        let original = receipt_with(
            "pkt-hit",
            1_000,
            CacheAnnotation {
                cache_status: CacheStatus::Hit,
                template_id: Some("tpl-1".to_string()),
                baseline_prompt_tokens: 7,
                baseline_completion_tokens: 200,
                avoided_prompt_tokens: 7,
                avoided_completion_tokens: 200,
                avoided_cost: avoided_cost(7, 200, &pricing),
                token_pricing: pricing,
                reuse_count_at_run_start: Some(1),
            },
        );
        repo.save(&original).unwrap();

        let loaded = repo.get(&original.receipt_id).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.avoided_cost.to_bits(), original.avoided_cost.to_bits());
    }

    #[test]
    fn test_tampered_document_is_rejected() {
        let repo = ReceiptRepo::open_in_memory().unwrap();
        let original = receipt("pkt-1", 1_000);
        repo.save(&original).unwrap();

        repo.conn()
            .unwrap()
            .execute(
                "UPDATE receipts SET document = json_set(document, '$.status', 'FAILURE')",
                [],
            )
            .unwrap();

        let err = repo.get(&original.receipt_id).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::IntegrityViolation);
    }

    #[test]
    fn test_list_filters_by_packet_newest_first() {
        let repo = ReceiptRepo::open_in_memory().unwrap();
        repo.save(&receipt("pkt-a", 1_000)).unwrap();
        repo.save(&receipt("pkt-b", 2_000)).unwrap();
        repo.save(&receipt("pkt-a", 3_000)).unwrap();

        let all = repo.list(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].started_at, 3_000);
        assert_eq!(all[0].status, "SUCCESS");
        assert_eq!(all[0].cache_status, "NONE");

        let only_a = repo.list(Some("pkt-a"), 10).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|s| s.packet_id == "pkt-a"));

        assert_eq!(repo.list(None, 1).unwrap().len(), 1);
    }
}
