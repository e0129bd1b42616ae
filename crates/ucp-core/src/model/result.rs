use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::OperationError;

/// Terminal state of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchTaken {
    Then,
    Else,
}

/// Sub-results of one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopIteration {
    pub index: usize,
    pub item: Value,
    pub results: Vec<OperationResult>,
    /// `continue_if` held, the body did not run
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Result tree mirroring the operation tree
///
/// Every variant carries `path` (location of the node in the packet),
/// `status` and epoch-millisecond `started_at`/`finished_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Standard {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        op_name: String,
        status: OpStatus,
        started_at: u64,
        finished_at: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OperationError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_reason: Option<String>,
    },
    Conditional {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        status: OpStatus,
        started_at: u64,
        finished_at: u64,
        condition_value: bool,
        /// Absent when the condition itself could not be evaluated
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch_taken: Option<BranchTaken>,
        results: Vec<OperationResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OperationError>,
    },
    Loop {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        status: OpStatus,
        started_at: u64,
        finished_at: u64,
        total_iterations: usize,
        iterations_completed: usize,
        iterations: Vec<LoopIteration>,
        /// Index of the iteration whose `break_if` ended the loop
        #[serde(default, skip_serializing_if = "Option::is_none")]
        broke_at: Option<usize>,
        /// Set when the loop itself failed (e.g. unresolvable `items_from`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OperationError>,
    },
    Parallel {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        status: OpStatus,
        started_at: u64,
        finished_at: u64,
        branches: Vec<OperationResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OperationError>,
    },
    TryCatchFinally {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        status: OpStatus,
        started_at: u64,
        finished_at: u64,
        caught: bool,
        /// The error diverted into `catch_branch`, or the node's own failure
        /// when `caught` is false
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<OperationError>,
        try_results: Vec<OperationResult>,
        catch_results: Vec<OperationResult>,
        finally_results: Vec<OperationResult>,
    },
}

impl OperationResult {
    pub fn status(&self) -> OpStatus {
        match self {
            OperationResult::Standard { status, .. }
            | OperationResult::Conditional { status, .. }
            | OperationResult::Loop { status, .. }
            | OperationResult::Parallel { status, .. }
            | OperationResult::TryCatchFinally { status, .. } => *status,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            OperationResult::Standard { path, .. }
            | OperationResult::Conditional { path, .. }
            | OperationResult::Loop { path, .. }
            | OperationResult::Parallel { path, .. }
            | OperationResult::TryCatchFinally { path, .. } => path,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            OperationResult::Standard { id, .. }
            | OperationResult::Conditional { id, .. }
            | OperationResult::Loop { id, .. }
            | OperationResult::Parallel { id, .. }
            | OperationResult::TryCatchFinally { id, .. } => id.as_deref(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status() == OpStatus::Error
    }

    /// The error recorded on this node itself, not on its children
    pub fn error(&self) -> Option<&OperationError> {
        match self {
            OperationResult::Standard { error, .. }
            | OperationResult::Conditional { error, .. }
            | OperationResult::Loop { error, .. }
            | OperationResult::Parallel { error, .. }
            | OperationResult::TryCatchFinally { error, .. } => error.as_ref(),
        }
    }
}
