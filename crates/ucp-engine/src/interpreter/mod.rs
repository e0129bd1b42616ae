//! Packet interpreter
//!
//! Recursive descent over the operation tree:
//!
//! - sequential contexts run one node at a time in declared order and stop
//!   at the first unhandled error
//! - `parallel` branches are polled concurrently on the run's task and all
//!   reach a terminal state before the node completes
//! - `try_catch_finally` diverts recoverable errors into `catch_branch`;
//!   fatal errors and aborts skip both `catch` and `finally`
//!
//! ## Logging Ownership
//!
//! The interpreter owns lifecycle logging: one `log_op_start!` and one
//! `log_op_end!`/`log_op_error!` per packet and per executed node. Drivers
//! only use `tracing::debug!`.

mod exec;
mod flow;

use std::sync::Arc;
use std::time::Instant;

use ucp_core::economics::CacheAnnotation;
use ucp_core::errors::{Result, UcpError};
use ucp_core::ledger::LedgerSnapshot;
use ucp_core::model::{Failure, Packet, Receipt, RunStatus, TokenPricing};
use ucp_core::receipt::{build_receipt, RunOutcome};
use ucp_core::{log_op_end, log_op_error, log_op_start};

use crate::abort::AbortHandle;
use crate::config::{EngineConfig, LimitsConfig};
use crate::drivers::CapabilityRegistry;
use crate::observer::{ExecutionObserver, LogLevel};
use exec::{Frame, Run};

/// Current time in epoch milliseconds
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Top-level nodes are depth 1
    pub max_depth: usize,
    pub max_loop_iterations: usize,
    pub max_expression_len: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for ExecutionLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_loop_iterations: config.max_loop_iterations,
            max_expression_len: config.max_expression_len,
        }
    }
}

pub struct Interpreter {
    registry: Arc<CapabilityRegistry>,
    limits: ExecutionLimits,
    enforce_ttl: bool,
    pricing: TokenPricing,
}

impl Interpreter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            limits: ExecutionLimits::default(),
            enforce_ttl: true,
            pricing: TokenPricing::default(),
        }
    }

    pub fn from_config(registry: Arc<CapabilityRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            limits: ExecutionLimits::from(&config.limits),
            enforce_ttl: config.ttl.enforce,
            pricing: config.pricing,
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_ttl_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_ttl = enforce;
        self
    }

    pub fn with_pricing(mut self, pricing: TokenPricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn pricing(&self) -> TokenPricing {
        self.pricing
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run a packet and seal the outcome into a receipt with no template
    /// annotation (`cache_status = NONE`).
    ///
    /// Run failures are reported inside the receipt, never as `Err`.
    ///
    /// ## Errors
    ///
    /// Returns `UcpError::Serialization` only if the receipt cannot be
    /// hashed.
    pub async fn execute(
        &self,
        packet: &Packet,
        observer: &dyn ExecutionObserver,
        abort: &AbortHandle,
    ) -> Result<Receipt> {
        let outcome = self.run(packet, observer, abort).await;
        build_receipt(packet, outcome, CacheAnnotation::none(self.pricing))
    }

    /// Run a packet to completion, failure or abort.
    pub async fn run(
        &self,
        packet: &Packet,
        observer: &dyn ExecutionObserver,
        abort: &AbortHandle,
    ) -> RunOutcome {
        log_op_start!("execute_packet", packet_id = %packet.id);
        let start = Instant::now();
        let started_at = now_ms();
        let run = Run::new(packet, &self.registry, self.limits, observer, abort);

        if self.enforce_ttl && packet.is_expired_at(started_at) {
            let err = UcpError::PacketExpired {
                packet_id: packet.id.clone(),
                expired_at_ms: packet.expires_at().unwrap_or_default(),
            };
            run.log(LogLevel::Error, err.to_string(), None, None);
            let failure = Failure {
                code: err.kind().code().to_string(),
                message: err.to_string(),
                node_path: None,
            };
            log_op_error!(
                "execute_packet",
                err,
                duration_ms = start.elapsed().as_millis() as u64,
                packet_id = %packet.id
            );
            return RunOutcome {
                status: RunStatus::Failure,
                failure: Some(failure),
                started_at,
                finished_at: now_ms(),
                operation_results: Vec::new(),
                ledger: LedgerSnapshot::default(),
            };
        }

        run.log(
            LogLevel::Info,
            format!(
                "executing packet {} ({} operations)",
                packet.id,
                packet.operations.len()
            ),
            None,
            Some(serde_json::json!({"run_id": run.run_id().as_str()})),
        );

        let (operation_results, halt) = run
            .exec_sequence(&packet.operations, "operations", Frame::default(), 1)
            .await;
        let ledger = run.ledger_snapshot();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, failure) = match &halt {
            None => {
                run.log(LogLevel::Info, "packet completed", None, None);
                log_op_end!(
                    "execute_packet",
                    duration_ms = duration_ms,
                    packet_id = %packet.id,
                    results = operation_results.len()
                );
                (RunStatus::Success, None)
            }
            Some(h) => {
                run.log(
                    LogLevel::Error,
                    format!("packet failed: {}", h.error),
                    Some(&h.node_path),
                    None,
                );
                log_op_error!(
                    "execute_packet",
                    h.to_ex_error(),
                    duration_ms = duration_ms,
                    packet_id = %packet.id
                );
                (RunStatus::Failure, Some(h.to_failure()))
            }
        };

        RunOutcome {
            status,
            failure,
            started_at,
            finished_at: now_ms(),
            operation_results,
            ledger,
        }
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .field("enforce_ttl", &self.enforce_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::TransformDriver;
    use crate::observer::NoopObserver;
    use serde_json::json;
    use ucp_core::model::OpStatus;
    use ucp_core::rules::{validate, ValidationOptions};

    fn packet(value: serde_json::Value) -> Packet {
        validate(&value, &ValidationOptions::default()).unwrap()
    }

    fn interpreter() -> Interpreter {
        let registry = CapabilityRegistry::new().with(Arc::new(TransformDriver::new()));
        Interpreter::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_expired_packet_is_not_run() {
        let mut p = packet(json!({
            "protocol_version": "0.1",
            "id": "pkt-old",
            "ttl_seconds": 1,
            "required_capabilities": ["transform"],
            "declared_permissions": [],
            "metadata": {"name": "n", "owner": "o"},
            "operations": [{"op_name": "transform.set", "arguments": {"value": 1}}]
        }));
        p.issued_at = Some(1_000);

        let outcome = interpreter()
            .run(&p, &NoopObserver, &AbortHandle::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(outcome.failure.unwrap().code, "ERR_PACKET_EXPIRED");
        assert!(outcome.operation_results.is_empty());

        let outcome = interpreter()
            .with_ttl_enforcement(false)
            .run(&p, &NoopObserver, &AbortHandle::new())
            .await;
        assert_eq!(outcome.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_depth_limit_is_fatal() {
        let p = packet(json!({
            "protocol_version": "0.1",
            "id": "pkt-deep",
            "ttl_seconds": 60,
            "required_capabilities": ["transform"],
            "declared_permissions": [],
            "metadata": {"name": "n", "owner": "o"},
            "operations": [{
                "type": "try_catch_finally",
                "try_branch": [{
                    "type": "conditional",
                    "condition": true,
                    "then_branch": [{"op_name": "transform.set", "arguments": {"value": 1}}]
                }],
                "catch_branch": [{"op_name": "transform.set", "arguments": {"value": 2}}]
            }]
        }));
        let limits = ExecutionLimits {
            max_depth: 2,
            ..ExecutionLimits::default()
        };
        let outcome = interpreter()
            .with_limits(limits)
            .run(&p, &NoopObserver, &AbortHandle::new())
            .await;

        assert_eq!(outcome.status, RunStatus::Failure);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.code, "ERR_DEPTH_EXCEEDED");
        assert_eq!(
            failure.node_path.as_deref(),
            Some("operations[0].try_branch[0].then_branch[0]")
        );
        match &outcome.operation_results[0] {
            ucp_core::OperationResult::TryCatchFinally {
                caught,
                catch_results,
                status,
                ..
            } => {
                assert!(!caught);
                assert!(catch_results.is_empty());
                assert_eq!(*status, OpStatus::Error);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_builds_verifiable_receipt() {
        let p = packet(json!({
            "protocol_version": "0.1",
            "id": "pkt-1",
            "ttl_seconds": 60,
            "required_capabilities": ["transform"],
            "declared_permissions": [],
            "metadata": {"name": "n", "owner": "o"},
            "operations": [{"op_name": "transform.set", "arguments": {"value": 1}}]
        }));
        let receipt = interpreter()
            .execute(&p, &NoopObserver, &AbortHandle::new())
            .await
            .unwrap();
        assert!(receipt.is_success());
        ucp_core::verify_receipt(&receipt).unwrap();
    }
}
