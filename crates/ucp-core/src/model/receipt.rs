use serde::{Deserialize, Serialize};

use super::result::OperationResult;
use crate::ledger::LedgerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failure,
}

/// Template cache outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    None,
}

/// Why a run ended in `FAILURE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_path: Option<String>,
}

/// Price per 1K tokens, captured at run time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPricing {
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            input_price_per_1k: 0.00015,
            output_price_per_1k: 0.0006,
        }
    }
}

/// Receipt - the immutable, hashed record of one packet execution
///
/// Built only by `receipt::build_receipt`; `receipt_hash` covers every other
/// field, so any mutation after construction is detectable with
/// `receipt::verify_receipt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub packet_id: String,
    pub protocol_version: String,
    pub packet_hash: String,
    pub receipt_hash: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub started_at: u64,
    pub finished_at: u64,
    pub operation_results: Vec<OperationResult>,
    pub token_ledger_snapshot: LedgerSnapshot,
    pub cache_status: CacheStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub baseline_prompt_tokens: u64,
    pub baseline_completion_tokens: u64,
    pub avoided_prompt_tokens: u64,
    pub avoided_completion_tokens: u64,
    pub avoided_cost: f64,
    pub token_pricing_snapshot: TokenPricing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_count_at_run_start: Option<u64>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
