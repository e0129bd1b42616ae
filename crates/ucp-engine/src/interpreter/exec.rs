//! Per-run state and node execution

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::OnceCell;

use ucp_core::context::{EvalContext, LoopFrame, ResultStore, StoredResult};
use ucp_core::digest::hash_value;
use ucp_core::errors::{OperationError, UcpError};
use ucp_core::expr::evaluate_condition;
use ucp_core::ledger::{LedgerSnapshot, TokenLedger};
use ucp_core::model::{
    BranchTaken, Condition, ConditionalOp, IterationSpec, LoopIteration, LoopOp, OpStatus, OperationNode,
    OperationResult, Packet, ParallelOp, StandardOp, TryCatchFinallyOp,
};
use ucp_core::path::Scope;
use ucp_core::resolve::{resolve_arguments, resolve_reference, resolve_value};
use ucp_core::{log_op_end, log_op_error, log_op_start};
use ucp_core_types::{RequestContext, RunId};

use super::flow::Halt;
use super::{now_ms, ExecutionLimits};
use crate::abort::AbortHandle;
use crate::drivers::{CapabilityRegistry, DriverError, TokenUsage};
use crate::observer::{ExecutionObserver, LogEntry, LogLevel};

pub(crate) type NodeOutcome = (OperationResult, Option<Halt>);
pub(crate) type SequenceOutcome = (Vec<OperationResult>, Option<Halt>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status_for(halt: &Option<Halt>) -> OpStatus {
    if halt.is_some() {
        OpStatus::Error
    } else {
        OpStatus::Ok
    }
}

/// Variables visible to one node
#[derive(Debug, Clone, Default)]
pub(crate) struct Frame {
    pub loop_frame: LoopFrame,
    /// Error being handled, inside a `catch_branch`
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone)]
struct CachedCall {
    output: Value,
    tokens: u64,
}

/// Everything one packet run shares across its nodes
///
/// Locks are only ever held for synchronous sections, never across an
/// `.await`, so parallel branches interleave freely.
pub(crate) struct Run<'a> {
    packet: &'a Packet,
    registry: &'a CapabilityRegistry,
    limits: ExecutionLimits,
    observer: &'a dyn ExecutionObserver,
    abort: &'a AbortHandle,
    run_id: RunId,
    results: Mutex<ResultStore>,
    ledger: Mutex<TokenLedger>,
    call_cache: Mutex<HashMap<String, Arc<OnceCell<CachedCall>>>>,
    completed: AtomicUsize,
    total: usize,
}

impl<'a> Run<'a> {
    pub fn new(
        packet: &'a Packet,
        registry: &'a CapabilityRegistry,
        limits: ExecutionLimits,
        observer: &'a dyn ExecutionObserver,
        abort: &'a AbortHandle,
    ) -> Self {
        Self {
            packet,
            registry,
            limits,
            observer,
            abort,
            run_id: RunId::new(),
            results: Mutex::new(ResultStore::new()),
            ledger: Mutex::new(TokenLedger::new()),
            call_cache: Mutex::new(HashMap::new()),
            completed: AtomicUsize::new(0),
            total: ucp_core::model::operation::count_nodes(&packet.operations),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        lock(&self.ledger).snapshot()
    }

    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        node_path: Option<&str>,
        data: Option<Value>,
    ) {
        self.observer.on_log(&LogEntry {
            timestamp_ms: now_ms(),
            level,
            message: message.into(),
            node_path: node_path.map(str::to_string),
            data,
        });
    }

    fn advance_progress(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer
            .on_progress(completed.min(self.total), self.total);
    }

    /// Evaluate something against the current results, ledger and frame
    fn with_scope<R>(&self, frame: &Frame, f: impl FnOnce(&dyn Scope) -> R) -> R {
        let results = lock(&self.results);
        let ledger = lock(&self.ledger).snapshot();
        let ctx = EvalContext {
            results: &results,
            loop_frame: &frame.loop_frame,
            ledger: &ledger,
            error: frame.error.as_ref(),
        };
        f(&ctx)
    }

    fn remember(&self, result: &OperationResult) {
        let Some(id) = result.id() else {
            return;
        };
        let output = match result {
            OperationResult::Standard { output, .. } => output.clone(),
            _ => None,
        };
        lock(&self.results).insert(
            id,
            StoredResult {
                status: result.status(),
                output,
                error: result.error().cloned(),
            },
        );
    }

    /// Run sibling nodes in order, stopping at the first unhandled error.
    ///
    /// The abort signal is checked before each node; an aborted node gets
    /// no result.
    pub async fn exec_sequence(
        &self,
        nodes: &[OperationNode],
        base: &str,
        frame: Frame,
        depth: usize,
    ) -> SequenceOutcome {
        let mut results = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let path = format!("{base}[{i}]");
            if self.abort.is_aborted() {
                self.log(LogLevel::Warn, "execution aborted", Some(&path), None);
                return (results, Some(Halt::aborted(&path)));
            }
            let (result, halt) = self.exec_node(node, path, frame.clone(), depth).await;
            results.push(result);
            if halt.is_some() {
                return (results, halt);
            }
        }
        (results, None)
    }

    fn exec_node<'s>(
        &'s self,
        node: &'s OperationNode,
        path: String,
        frame: Frame,
        depth: usize,
    ) -> BoxFuture<'s, NodeOutcome> {
        async move {
            log_op_start!(
                "execute_node",
                packet_id = %self.packet.id,
                node_path = %path,
                node_type = node.kind()
            );
            let start = Instant::now();

            let (result, halt) = if depth > self.limits.max_depth {
                let err = UcpError::DepthExceeded {
                    limit: self.limits.max_depth,
                    node_path: path.clone(),
                };
                let result = failed_result(node, &path, now_ms(), err.to_operation_error());
                (result, Some(Halt::from_error(&err, &path)))
            } else {
                match node {
                    OperationNode::Standard(op) => self.exec_standard(op, &path, &frame).await,
                    OperationNode::Conditional(op) => {
                        self.exec_conditional(op, &path, frame, depth).await
                    }
                    OperationNode::Loop(op) => self.exec_loop(op, &path, frame, depth).await,
                    OperationNode::Parallel(op) => {
                        self.exec_parallel(op, &path, frame, depth).await
                    }
                    OperationNode::TryCatchFinally(op) => {
                        self.exec_try(op, &path, frame, depth).await
                    }
                }
            };

            let duration_ms = start.elapsed().as_millis() as u64;
            match &halt {
                Some(h) => {
                    log_op_error!(
                        "execute_node",
                        h.to_ex_error(),
                        duration_ms = duration_ms,
                        packet_id = %self.packet.id,
                        node_path = %path
                    );
                }
                None => {
                    log_op_end!(
                        "execute_node",
                        duration_ms = duration_ms,
                        packet_id = %self.packet.id,
                        node_path = %path,
                        status = ?result.status()
                    );
                }
            }

            self.remember(&result);
            self.advance_progress();
            (result, halt)
        }
        .boxed()
    }

    async fn exec_standard(&self, op: &StandardOp, path: &str, frame: &Frame) -> NodeOutcome {
        let started_at = now_ms();
        let standard = |status, output, error, skip_reason| OperationResult::Standard {
            path: path.to_string(),
            id: op.id.clone(),
            op_name: op.op_name.clone(),
            status,
            started_at,
            finished_at: now_ms(),
            output,
            error,
            skip_reason,
        };

        let outcome = match self.skip_reason(op, frame) {
            Ok(Some(reason)) => {
                self.log(
                    LogLevel::Info,
                    format!("skipped {} ({reason})", op.op_name),
                    Some(path),
                    None,
                );
                return (standard(OpStatus::Skipped, None, None, Some(reason)), None);
            }
            Ok(None) => {
                self.log(
                    LogLevel::Info,
                    format!("running {}", op.op_name),
                    Some(path),
                    None,
                );
                self.invoke(op, path, frame).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(output) => {
                self.log(
                    LogLevel::Info,
                    format!("{} completed", op.op_name),
                    Some(path),
                    None,
                );
                (standard(OpStatus::Ok, Some(output), None, None), None)
            }
            Err(err) => {
                let error = err.to_operation_error();
                self.log(
                    LogLevel::Error,
                    format!("{} failed: {}", op.op_name, error.message),
                    Some(path),
                    Some(json!({"code": error.code})),
                );
                let halt = Halt::from_error(&err, path);
                (standard(OpStatus::Error, None, Some(error), None), Some(halt))
            }
        }
    }

    /// `skip_condition` wins over `run_condition`
    fn skip_reason(&self, op: &StandardOp, frame: &Frame) -> Result<Option<String>, UcpError> {
        let max_len = self.limits.max_expression_len;
        self.with_scope(frame, |scope| {
            if let Some(condition) = &op.skip_condition {
                if evaluate_condition(condition, scope, max_len)? {
                    return Ok(Some("skip_condition".to_string()));
                }
            }
            if let Some(condition) = &op.run_condition {
                if !evaluate_condition(condition, scope, max_len)? {
                    return Ok(Some("run_condition".to_string()));
                }
            }
            Ok(None)
        })
    }

    async fn invoke(&self, op: &StandardOp, path: &str, frame: &Frame) -> Result<Value, UcpError> {
        let (capability, action) =
            op.capability_action()
                .ok_or_else(|| UcpError::InvalidArguments {
                    op_name: op.op_name.clone(),
                    reason: "op_name must be '<capability>.<action>'".to_string(),
                })?;

        if !self.packet.declares(capability) {
            return Err(UcpError::UnauthorizedCapability {
                capability: capability.to_string(),
                node_path: path.to_string(),
            });
        }
        let driver = self
            .registry
            .get(capability)
            .ok_or_else(|| UcpError::UnknownCapability {
                capability: capability.to_string(),
            })?;
        if !driver.supports(action) {
            return Err(UcpError::UnknownAction {
                capability: capability.to_string(),
                action: action.to_string(),
            });
        }

        let args = self.with_scope(frame, |scope| resolve_arguments(&op.arguments, scope))?;
        let ctx = RequestContext::new(self.run_id.clone(), &self.packet.id, path);

        if !driver.meters_tokens() {
            return driver
                .invoke(action, &args, &ctx)
                .await
                .map_err(|e| driver_error(e, op, capability, action));
        }

        let key = hash_value(&json!({
            "capability": capability,
            "action": action,
            "arguments": Value::Object(args.clone()),
        }));
        // Identical calls share one slot; a concurrent caller waits for the
        // first invocation instead of making its own
        let slot = lock(&self.call_cache).entry(key).or_default().clone();
        let mut invoked = false;
        let call = slot
            .get_or_try_init(|| {
                invoked = true;
                async {
                    let output = driver
                        .invoke(action, &args, &ctx)
                        .await
                        .map_err(|e| driver_error(e, op, capability, action))?;
                    let usage = TokenUsage::from_output(&output).unwrap_or_default();
                    let snapshot = {
                        let mut ledger = lock(&self.ledger);
                        ledger.record_call(usage.input, usage.output);
                        ledger.snapshot()
                    };
                    self.observer.on_token_update(&snapshot);
                    Ok::<_, UcpError>(CachedCall {
                        output,
                        tokens: usage.total(),
                    })
                }
            })
            .await?;
        if invoked {
            return Ok(call.output.clone());
        }

        let snapshot = {
            let mut ledger = lock(&self.ledger);
            ledger.record_cache_hit(call.tokens);
            ledger.snapshot()
        };
        self.log(
            LogLevel::Info,
            format!("{} served from run cache", op.op_name),
            Some(path),
            Some(json!({"saved_tokens": call.tokens})),
        );
        self.observer.on_token_update(&snapshot);
        let mut output = call.output.clone();
        if let Value::Object(map) = &mut output {
            map.insert("cached".to_string(), Value::Bool(true));
        }
        Ok(output)
    }

    async fn exec_conditional(
        &self,
        op: &ConditionalOp,
        path: &str,
        frame: Frame,
        depth: usize,
    ) -> NodeOutcome {
        let started_at = now_ms();
        let max_len = self.limits.max_expression_len;
        let value = match self.with_scope(&frame, |scope| {
            evaluate_condition(&op.condition, scope, max_len)
        }) {
            Ok(value) => value,
            Err(err) => {
                let result = OperationResult::Conditional {
                    path: path.to_string(),
                    id: op.id.clone(),
                    status: OpStatus::Error,
                    started_at,
                    finished_at: now_ms(),
                    condition_value: false,
                    branch_taken: None,
                    results: Vec::new(),
                    error: Some(err.to_operation_error()),
                };
                return (result, Some(Halt::from_error(&err, path)));
            }
        };

        let (branch, nodes, label) = if value {
            (BranchTaken::Then, &op.then_branch, "then_branch")
        } else {
            (BranchTaken::Else, &op.else_branch, "else_branch")
        };
        self.log(
            LogLevel::Debug,
            format!("condition is {value}, taking {label}"),
            Some(path),
            None,
        );
        let (results, halt) = self
            .exec_sequence(nodes, &format!("{path}.{label}"), frame, depth + 1)
            .await;

        let result = OperationResult::Conditional {
            path: path.to_string(),
            id: op.id.clone(),
            status: status_for(&halt),
            started_at,
            finished_at: now_ms(),
            condition_value: value,
            branch_taken: Some(branch),
            results,
            error: None,
        };
        (result, halt)
    }

    async fn exec_loop(&self, op: &LoopOp, path: &str, frame: Frame, depth: usize) -> NodeOutcome {
        let started_at = now_ms();
        let items = match self.iteration_items(op, path, &frame) {
            Ok(items) => items,
            Err(err) => {
                self.log(LogLevel::Error, err.to_string(), Some(path), None);
                let result = OperationResult::Loop {
                    path: path.to_string(),
                    id: op.id.clone(),
                    status: OpStatus::Error,
                    started_at,
                    finished_at: now_ms(),
                    total_iterations: 0,
                    iterations_completed: 0,
                    iterations: Vec::new(),
                    broke_at: None,
                    error: Some(err.to_operation_error()),
                };
                return (result, Some(Halt::from_error(&err, path)));
            }
        };

        let total = items.len();
        let body_path = format!("{path}.body");
        let max_len = self.limits.max_expression_len;
        let mut iterations = Vec::with_capacity(total);
        let mut completed = 0;
        let mut broke_at = None;
        let mut halt = None;
        let mut error = None;

        for (index, item) in items.into_iter().enumerate() {
            if self.abort.is_aborted() {
                self.log(LogLevel::Warn, "execution aborted", Some(path), None);
                halt = Some(Halt::aborted(&body_path));
                break;
            }
            let child = Frame {
                loop_frame: frame.loop_frame.child(
                    op.item_var(),
                    op.index_var(),
                    item.clone(),
                    index,
                    total,
                ),
                error: frame.error.clone(),
            };

            let check = |condition: &Condition| {
                self.with_scope(&child, |scope| evaluate_condition(condition, scope, max_len))
            };
            let skip = match op.continue_if.as_ref().map(check).transpose() {
                Ok(skip) => skip.unwrap_or(false),
                Err(err) => {
                    halt = Some(Halt::from_error(&err, &format!("{path}.continue_if")));
                    error = Some(err.to_operation_error());
                    break;
                }
            };
            if skip {
                self.log(
                    LogLevel::Debug,
                    format!("continue_if holds, skipping iteration {index}"),
                    Some(path),
                    None,
                );
                iterations.push(LoopIteration {
                    index,
                    item,
                    results: Vec::new(),
                    skipped: true,
                });
                completed += 1;
                continue;
            }

            let (results, iteration_halt) = self
                .exec_sequence(&op.body, &body_path, child.clone(), depth + 1)
                .await;
            iterations.push(LoopIteration {
                index,
                item,
                results,
                skipped: false,
            });
            if iteration_halt.is_some() {
                halt = iteration_halt;
                break;
            }
            completed += 1;

            match op.break_if.as_ref().map(check).transpose() {
                Ok(Some(true)) => {
                    self.log(
                        LogLevel::Debug,
                        format!("break_if holds after iteration {index}"),
                        Some(path),
                        None,
                    );
                    broke_at = Some(index);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    halt = Some(Halt::from_error(&err, &format!("{path}.break_if")));
                    error = Some(err.to_operation_error());
                    break;
                }
            }
        }

        let result = OperationResult::Loop {
            path: path.to_string(),
            id: op.id.clone(),
            status: status_for(&halt),
            started_at,
            finished_at: now_ms(),
            total_iterations: total,
            iterations_completed: completed,
            iterations,
            broke_at,
            error,
        };
        (result, halt)
    }

    /// Materialize the loop's items, refusing more than the iteration limit
    /// before allocating them
    fn iteration_items(
        &self,
        op: &LoopOp,
        path: &str,
        frame: &Frame,
    ) -> Result<Vec<Value>, UcpError> {
        let limit = self.limits.max_loop_iterations;
        let too_many = |requested: usize| UcpError::IterationLimit {
            node_path: path.to_string(),
            requested,
            limit,
        };

        let items = match &op.iteration {
            IterationSpec::Count(n) => {
                let n = usize::try_from(*n).unwrap_or(usize::MAX);
                if n > limit {
                    return Err(too_many(n));
                }
                (0..n).map(|i| json!(i)).collect()
            }
            IterationSpec::Range { start, end } => {
                let len = (i128::from(*end) - i128::from(*start)).max(0);
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                if len > limit {
                    return Err(too_many(len));
                }
                (*start..*end).map(|i| json!(i)).collect()
            }
            IterationSpec::Items(items) => self.with_scope(frame, |scope| {
                items
                    .iter()
                    .map(|item| resolve_value(item, scope))
                    .collect::<Result<Vec<_>, _>>()
            })?,
            IterationSpec::ItemsFrom(reference) => {
                let value = self.with_scope(frame, |scope| resolve_reference(reference, scope))?;
                match value {
                    Value::Array(items) => items,
                    Value::String(text) => match serde_json::from_str::<Value>(&text) {
                        Ok(Value::Array(items)) => items,
                        _ => return Err(not_a_list(reference)),
                    },
                    Value::Null => Vec::new(),
                    _ => return Err(not_a_list(reference)),
                }
            }
        };

        if items.len() > limit {
            return Err(too_many(items.len()));
        }
        Ok(items)
    }

    async fn exec_parallel(
        &self,
        op: &ParallelOp,
        path: &str,
        frame: Frame,
        depth: usize,
    ) -> NodeOutcome {
        let started_at = now_ms();
        let branches = op.branches.iter().enumerate().map(|(i, node)| {
            self.exec_node(node, format!("{path}.branches[{i}]"), frame.clone(), depth + 1)
        });
        let outcomes = join_all(branches).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut halts = Vec::new();
        for (result, halt) in outcomes {
            results.push(result);
            halts.extend(halt);
        }
        let halt = Halt::most_severe(halts);

        let result = OperationResult::Parallel {
            path: path.to_string(),
            id: op.id.clone(),
            status: status_for(&halt),
            started_at,
            finished_at: now_ms(),
            branches: results,
            error: None,
        };
        (result, halt)
    }

    async fn exec_try(
        &self,
        op: &TryCatchFinallyOp,
        path: &str,
        frame: Frame,
        depth: usize,
    ) -> NodeOutcome {
        let started_at = now_ms();
        let (try_results, try_halt) = self
            .exec_sequence(&op.try_branch, &format!("{path}.try_branch"), frame.clone(), depth + 1)
            .await;

        let mut caught_error = None;
        let mut catch_results = Vec::new();
        let mut finally_results = Vec::new();

        let halt = match try_halt {
            Some(h) if !h.is_recoverable() => Some(h),
            try_halt => {
                let mut pending = None;
                if let Some(h) = try_halt {
                    self.log(
                        LogLevel::Warn,
                        format!("caught {}: {}", h.error.code, h.error.message),
                        Some(path),
                        Some(json!({"from": h.node_path})),
                    );
                    caught_error = Some(h.error.clone());
                    let catch_frame = Frame {
                        loop_frame: frame.loop_frame.clone(),
                        error: Some(h.error),
                    };
                    let (results, catch_halt) = self
                        .exec_sequence(
                            &op.catch_branch,
                            &format!("{path}.catch_branch"),
                            catch_frame,
                            depth + 1,
                        )
                        .await;
                    catch_results = results;
                    pending = catch_halt;
                }

                if pending.as_ref().is_some_and(|h| !h.is_recoverable()) {
                    pending
                } else {
                    let (results, finally_halt) = self
                        .exec_sequence(
                            &op.finally_branch,
                            &format!("{path}.finally_branch"),
                            frame,
                            depth + 1,
                        )
                        .await;
                    finally_results = results;
                    Halt::most_severe(pending.into_iter().chain(finally_halt))
                }
            }
        };

        let result = OperationResult::TryCatchFinally {
            path: path.to_string(),
            id: op.id.clone(),
            status: status_for(&halt),
            started_at,
            finished_at: now_ms(),
            caught: caught_error.is_some(),
            error: caught_error,
            try_results,
            catch_results,
            finally_results,
        };
        (result, halt)
    }
}

fn not_a_list(reference: &str) -> UcpError {
    UcpError::ArgumentResolution {
        reference: reference.to_string(),
        reason: "does not resolve to a list".to_string(),
    }
}

fn driver_error(err: DriverError, op: &StandardOp, capability: &str, action: &str) -> UcpError {
    match err {
        DriverError::UnknownAction(action) => UcpError::UnknownAction {
            capability: capability.to_string(),
            action,
        },
        DriverError::InvalidArguments(reason) => UcpError::InvalidArguments {
            op_name: op.op_name.clone(),
            reason,
        },
        other => UcpError::Driver {
            capability: capability.to_string(),
            action: action.to_string(),
            message: other.to_string(),
        },
    }
}

/// Result for a node that failed before doing any work
fn failed_result(
    node: &OperationNode,
    path: &str,
    started_at: u64,
    error: OperationError,
) -> OperationResult {
    let path = path.to_string();
    let id = node.id().map(str::to_string);
    let finished_at = now_ms();
    let status = OpStatus::Error;
    match node {
        OperationNode::Standard(op) => OperationResult::Standard {
            path,
            id,
            op_name: op.op_name.clone(),
            status,
            started_at,
            finished_at,
            output: None,
            error: Some(error),
            skip_reason: None,
        },
        OperationNode::Conditional(_) => OperationResult::Conditional {
            path,
            id,
            status,
            started_at,
            finished_at,
            condition_value: false,
            branch_taken: None,
            results: Vec::new(),
            error: Some(error),
        },
        OperationNode::Loop(_) => OperationResult::Loop {
            path,
            id,
            status,
            started_at,
            finished_at,
            total_iterations: 0,
            iterations_completed: 0,
            iterations: Vec::new(),
            broke_at: None,
            error: Some(error),
        },
        OperationNode::Parallel(_) => OperationResult::Parallel {
            path,
            id,
            status,
            started_at,
            finished_at,
            branches: Vec::new(),
            error: Some(error),
        },
        OperationNode::TryCatchFinally(_) => OperationResult::TryCatchFinally {
            path,
            id,
            status,
            started_at,
            finished_at,
            caught: false,
            error: Some(error),
            try_results: Vec::new(),
            catch_results: Vec::new(),
            finally_results: Vec::new(),
        },
    }
}
