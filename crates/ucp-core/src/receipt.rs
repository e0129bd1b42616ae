//! Receipt builder and verifier

use serde_json::Value;
use uuid::Uuid;

use crate::digest::{packet_hash, packet_value_hash, receipt_value_hash, RECEIPT_HASH_FIELD};
use crate::economics::CacheAnnotation;
use crate::errors::{Result, UcpError};
use crate::ledger::LedgerSnapshot;
use crate::model::{Failure, OperationResult, Packet, Receipt, RunStatus};

/// Everything the interpreter knows once a run has stopped
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub failure: Option<Failure>,
    pub started_at: u64,
    pub finished_at: u64,
    pub operation_results: Vec<OperationResult>,
    pub ledger: LedgerSnapshot,
}

/// Assemble and seal a receipt.
///
/// The cache annotation is applied before hashing so `receipt_hash` covers
/// it like every other field.
///
/// ## Errors
///
/// Returns `UcpError::Serialization` if the packet or receipt cannot be
/// encoded.
pub fn build_receipt(
    packet: &Packet,
    outcome: RunOutcome,
    annotation: CacheAnnotation,
) -> Result<Receipt> {
    let mut receipt = Receipt {
        receipt_id: Uuid::now_v7().to_string(),
        packet_id: packet.id.clone(),
        protocol_version: packet.protocol_version.clone(),
        packet_hash: packet_hash(packet)?,
        receipt_hash: String::new(),
        status: outcome.status,
        failure: outcome.failure,
        started_at: outcome.started_at,
        finished_at: outcome.finished_at,
        operation_results: outcome.operation_results,
        token_ledger_snapshot: outcome.ledger,
        cache_status: annotation.cache_status,
        template_id: annotation.template_id,
        baseline_prompt_tokens: annotation.baseline_prompt_tokens,
        baseline_completion_tokens: annotation.baseline_completion_tokens,
        avoided_prompt_tokens: annotation.avoided_prompt_tokens,
        avoided_completion_tokens: annotation.avoided_completion_tokens,
        avoided_cost: annotation.avoided_cost,
        token_pricing_snapshot: annotation.token_pricing,
        reuse_count_at_run_start: annotation.reuse_count_at_run_start,
    };
    receipt.receipt_hash = compute_receipt_hash(&receipt)?;
    Ok(receipt)
}

/// Recompute the hash a receipt should carry
///
/// ## Errors
///
/// Returns `UcpError::Serialization` if the receipt cannot be encoded.
pub fn compute_receipt_hash(receipt: &Receipt) -> Result<String> {
    let value = serde_json::to_value(receipt)?;
    Ok(receipt_value_hash(&value))
}

/// Check that a receipt has not been modified since it was built.
///
/// ## Errors
///
/// Returns `UcpError::IntegrityMismatch` when the stored and recomputed
/// hashes differ.
pub fn verify_receipt(receipt: &Receipt) -> Result<()> {
    let computed = compute_receipt_hash(receipt)?;
    check("receipt_hash", &receipt.receipt_hash, computed)
}

/// Verify an exported receipt document without decoding it first, so
/// fields unknown to this version are still covered.
///
/// ## Errors
///
/// Returns `UcpError::IntegrityMismatch` on a hash mismatch and
/// `UcpError::Serialization` if the document has no `receipt_hash` string.
pub fn verify_receipt_value(document: &Value) -> Result<()> {
    let stored = document
        .get(RECEIPT_HASH_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| UcpError::Serialization {
            message: "receipt document has no receipt_hash".to_string(),
        })?;
    check("receipt_hash", stored, receipt_value_hash(document))
}

/// Check that `receipt` was produced from `packet`.
///
/// ## Errors
///
/// Returns `UcpError::IntegrityMismatch` if the packet's hash differs from
/// the receipt's `packet_hash`.
pub fn verify_packet_binding(receipt: &Receipt, packet: &Packet) -> Result<()> {
    check("packet_hash", &receipt.packet_hash, packet_hash(packet)?)
}

/// Packet-binding check against a raw packet document
///
/// ## Errors
///
/// Returns `UcpError::IntegrityMismatch` on mismatch.
pub fn verify_packet_binding_value(receipt: &Receipt, packet: &Value) -> Result<()> {
    check("packet_hash", &receipt.packet_hash, packet_value_hash(packet))
}

fn check(field: &str, stored: &str, computed: String) -> Result<()> {
    if stored == computed {
        Ok(())
    } else {
        Err(UcpError::IntegrityMismatch {
            field: field.to_string(),
            stored: stored.to_string(),
            computed,
        })
    }
}
