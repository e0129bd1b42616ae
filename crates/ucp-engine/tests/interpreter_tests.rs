#![allow(clippy::unwrap_used, clippy::expect_used)]
// Integration tests for packet execution: sequencing, control flow, error
// propagation, abort and the per-run LLM cache.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;

use common::{interpreter, packet, ScriptedDriver};
use ucp_core::model::{BranchTaken, OpStatus, RunStatus};
use ucp_core::{InMemoryKvStore, KvStore, OperationResult};
use ucp_engine::drivers::{LocalStorageDriver, WaitDriver};
use ucp_engine::{
    AbortHandle, CapabilityRegistry, CollectingObserver, ExecutionLimits, ExecutionObserver,
    Interpreter, NoopObserver,
};

fn output(result: &OperationResult) -> Value {
    match result {
        OperationResult::Standard { output, .. } => output.clone().unwrap_or(Value::Null),
        other => panic!("expected a standard result, got {other:?}"),
    }
}

/// Aborts the run once `after` nodes have completed
struct AbortAfter {
    abort: AbortHandle,
    after: usize,
}

impl ExecutionObserver for AbortAfter {
    fn on_progress(&self, completed: usize, _total: usize) {
        if completed >= self.after {
            self.abort.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Sequencing and data flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sequential_operations_all_succeed() {
    let p = packet(
        "pkt-seq",
        &["transform"],
        json!([
            {"op_name": "transform.set", "arguments": {"value": 1}},
            {"op_name": "transform.set", "arguments": {"value": 2}},
            {"op_name": "transform.set", "arguments": {"value": 3}}
        ]),
    );
    let observer = CollectingObserver::new();
    let outcome = interpreter(&[])
        .run(&p, &observer, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.operation_results.len(), 3);
    for (i, result) in outcome.operation_results.iter().enumerate() {
        assert_eq!(result.path(), format!("operations[{i}]"));
        assert_eq!(result.status(), OpStatus::Ok);
        assert_eq!(output(result)["value"], json!(i + 1));
    }
    assert_eq!(observer.progress(), vec![(1, 3), (2, 3), (3, 3)]);
    assert!(outcome.started_at <= outcome.finished_at);
}

#[tokio::test]
async fn test_outputs_flow_into_later_arguments() {
    let p = packet(
        "pkt-flow",
        &["transform"],
        json!([
            {"id": "a", "op_name": "transform.set", "arguments": {"value": {"x": 5}}},
            {
                "id": "b",
                "op_name": "transform.set",
                "arguments": {"value": "{{ ops.a.output.value.x }}", "label": "x={{ ops.a.output.value.x }}"},
                "run_condition": "ops.a.output.value.x > 3"
            }
        ]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(output(&outcome.operation_results[1])["value"], json!(5));
}

#[tokio::test]
async fn test_skip_condition_wins_over_run_condition() {
    let p = packet(
        "pkt-skip",
        &["transform"],
        json!([
            {
                "op_name": "transform.set",
                "arguments": {"value": 1},
                "skip_condition": true,
                "run_condition": true
            },
            {"op_name": "transform.set", "arguments": {"value": 2}, "run_condition": false}
        ]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    for (result, reason) in outcome
        .operation_results
        .iter()
        .zip(["skip_condition", "run_condition"])
    {
        match result {
            OperationResult::Standard {
                status,
                skip_reason,
                output,
                ..
            } => {
                assert_eq!(*status, OpStatus::Skipped);
                assert_eq!(skip_reason.as_deref(), Some(reason));
                assert!(output.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_first_error_stops_the_sequence() {
    let http = Arc::new(ScriptedDriver::new("http"));
    let p = packet(
        "pkt-stop",
        &["http", "transform"],
        json!([
            {"op_name": "transform.set", "arguments": {"value": 1}},
            {"op_name": "http.fail", "arguments": {"message": "connection refused"}},
            {"op_name": "transform.set", "arguments": {"value": 3}}
        ]),
    );
    let outcome = interpreter(&[http.clone()])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.operation_results.len(), 2);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_DRIVER_FAILED");
    assert_eq!(failure.node_path.as_deref(), Some("operations[1]"));
    assert!(failure.message.contains("connection refused"));
    assert_eq!(http.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Conditional and loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_conditional_takes_else_branch() {
    let p = packet(
        "pkt-cond",
        &["transform"],
        json!([
            {"id": "answer", "op_name": "transform.set", "arguments": {"value": "no"}},
            {
                "type": "conditional",
                "condition": "ops.answer.output.value == 'yes'",
                "then_branch": [{"op_name": "transform.set", "arguments": {"value": "then"}}],
                "else_branch": [{"op_name": "transform.set", "arguments": {"value": "else"}}]
            }
        ]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    match &outcome.operation_results[1] {
        OperationResult::Conditional {
            condition_value,
            branch_taken,
            results,
            ..
        } => {
            assert!(!condition_value);
            assert_eq!(*branch_taken, Some(BranchTaken::Else));
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].path(), "operations[1].else_branch[0]");
            assert_eq!(output(&results[0])["value"], json!("else"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_loop_over_items_from_previous_output() {
    let p = packet(
        "pkt-loop",
        &["transform"],
        json!([
            {"id": "split", "op_name": "transform.split", "arguments": {"value": "a,b,c"}},
            {
                "type": "loop",
                "items_from": "ops.split.output.items",
                "item_var": "letter",
                "body": [
                    {"op_name": "transform.set", "arguments": {"value": "{{ loop.letter }}-{{ loop.index }}"}},
                    {"op_name": "transform.set", "arguments": {"value": "end"}, "skip_condition": "!loop.last"}
                ]
            }
        ]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    match &outcome.operation_results[1] {
        OperationResult::Loop {
            total_iterations,
            iterations_completed,
            iterations,
            ..
        } => {
            assert_eq!(*total_iterations, 3);
            assert_eq!(*iterations_completed, 3);
            assert_eq!(iterations[2].item, json!("c"));
            assert_eq!(output(&iterations[2].results[0])["value"], json!("c-2"));
            assert_eq!(iterations[2].results[0].path(), "operations[1].body[0]");
            assert_eq!(iterations[0].results[1].status(), OpStatus::Skipped);
            assert_eq!(iterations[2].results[1].status(), OpStatus::Ok);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_nested_loops_see_outer_variables() {
    let p = packet(
        "pkt-nested",
        &["transform"],
        json!([{
            "type": "loop",
            "items": ["x", "y"],
            "item_var": "row",
            "index_var": "r",
            "body": [{
                "type": "loop",
                "range": {"start": 0, "end": 2},
                "item_var": "col",
                "index_var": "c",
                "body": [{"op_name": "transform.set", "arguments": {"value": "{{ loop.row }}{{ loop.col }}"}}]
            }]
        }]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    let OperationResult::Loop { iterations, .. } = &outcome.operation_results[0] else {
        panic!("expected a loop result");
    };
    let OperationResult::Loop {
        iterations: inner, ..
    } = &iterations[1].results[0]
    else {
        panic!("expected an inner loop result");
    };
    let values: Vec<Value> = inner
        .iter()
        .map(|it| output(&it.results[0])["value"].clone())
        .collect();
    assert_eq!(values, vec![json!("y0"), json!("y1")]);
}

#[tokio::test]
async fn test_loop_over_iteration_limit_is_refused() {
    let p = packet(
        "pkt-limit",
        &["transform"],
        json!([{
            "type": "loop",
            "count": 5,
            "body": [{"op_name": "transform.set", "arguments": {"value": 1}}]
        }]),
    );
    let limits = ExecutionLimits {
        max_loop_iterations: 3,
        ..ExecutionLimits::default()
    };
    let outcome = interpreter(&[])
        .with_limits(limits)
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failure.unwrap().code, "ERR_ITERATION_LIMIT");
    match &outcome.operation_results[0] {
        OperationResult::Loop {
            total_iterations,
            iterations,
            ..
        } => {
            assert_eq!(*total_iterations, 0);
            assert!(iterations.is_empty());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_loop_continue_if_skips_and_break_if_stops() {
    let p = packet(
        "pkt-loop-flow",
        &["transform"],
        json!([{
            "type": "loop",
            "count": 6,
            "continue_if": "loop.index == 1",
            "break_if": "ops.step.output.value >= 3",
            "body": [{"op_name": "transform.set", "id": "step", "arguments": {"value": "{{ loop.index }}"}}]
        }]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    let OperationResult::Loop {
        total_iterations,
        iterations_completed,
        iterations,
        broke_at,
        ..
    } = &outcome.operation_results[0]
    else {
        panic!("expected a loop result");
    };
    assert_eq!(*total_iterations, 6);
    assert_eq!(*iterations_completed, 4);
    assert_eq!(*broke_at, Some(3));
    assert_eq!(iterations.len(), 4);

    assert!(iterations[1].skipped);
    assert!(iterations[1].results.is_empty());
    let ran: Vec<Value> = iterations
        .iter()
        .filter(|it| !it.skipped)
        .map(|it| output(&it.results[0])["value"].clone())
        .collect();
    assert_eq!(ran, vec![json!(0), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_loop_break_if_evaluation_error_fails_the_loop() {
    let p = packet(
        "pkt-loop-break-err",
        &["transform"],
        json!([{
            "type": "loop",
            "count": 3,
            "break_if": "loop.index >= 100",
            "body": [{"op_name": "transform.set", "arguments": {"value": 1}}]
        }]),
    );
    let limits = ExecutionLimits {
        max_expression_len: 10,
        ..ExecutionLimits::default()
    };
    let outcome = interpreter(&[])
        .with_limits(limits)
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(
        outcome.failure.unwrap().node_path.as_deref(),
        Some("operations[0].break_if")
    );
    let OperationResult::Loop {
        status,
        iterations_completed,
        broke_at,
        error,
        ..
    } = &outcome.operation_results[0]
    else {
        panic!("expected a loop result");
    };
    assert_eq!(*status, OpStatus::Error);
    assert_eq!(*iterations_completed, 1);
    assert_eq!(*broke_at, None);
    assert!(error.is_some());
}

// ---------------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parallel_branches_all_finish_when_one_fails() {
    let http = Arc::new(ScriptedDriver::new("http"));
    let p = packet(
        "pkt-par",
        &["http", "transform"],
        json!([{
            "type": "parallel",
            "branches": [
                {"op_name": "http.get", "arguments": {"url": "https://a.test"}},
                {"op_name": "http.get", "arguments": {"url": "https://b.test"}},
                {"op_name": "http.fail", "arguments": {"message": "503"}},
                {"op_name": "http.get", "arguments": {"url": "https://d.test"}},
                {"op_name": "transform.set", "arguments": {"value": 5}}
            ]
        }]),
    );
    let outcome = interpreter(&[http.clone()])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_DRIVER_FAILED");
    assert_eq!(failure.node_path.as_deref(), Some("operations[0].branches[2]"));

    match &outcome.operation_results[0] {
        OperationResult::Parallel {
            status, branches, ..
        } => {
            assert_eq!(*status, OpStatus::Error);
            assert_eq!(branches.len(), 5);
            let statuses: Vec<OpStatus> = branches.iter().map(|b| b.status()).collect();
            assert_eq!(
                statuses,
                vec![
                    OpStatus::Ok,
                    OpStatus::Ok,
                    OpStatus::Error,
                    OpStatus::Ok,
                    OpStatus::Ok
                ]
            );
            for (i, branch) in branches.iter().enumerate() {
                assert_eq!(branch.path(), format!("operations[0].branches[{i}]"));
            }
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(http.call_count(), 4);
}

#[tokio::test]
async fn test_wait_until_sees_storage_written_by_sibling_branch() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let registry = CapabilityRegistry::new()
        .with(Arc::new(WaitDriver::new().with_store(store.clone())))
        .with(Arc::new(LocalStorageDriver::new(store.clone())));
    let p = packet(
        "pkt-wait-until",
        &["wait", "local_storage"],
        json!([{
            "type": "parallel",
            "branches": [
                {
                    "op_name": "wait.until",
                    "id": "gate",
                    "arguments": {"key": "report.status", "equals": "ready", "interval_ms": 5, "timeout_ms": 2000}
                },
                {
                    "type": "conditional",
                    "condition": true,
                    "then_branch": [
                        {"op_name": "wait.delay", "arguments": {"ms": 25}},
                        {"op_name": "local_storage.put", "arguments": {"key": "report.status", "value": "ready"}}
                    ]
                }
            ]
        }]),
    );
    let outcome = Interpreter::new(Arc::new(registry))
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    let OperationResult::Parallel { branches, .. } = &outcome.operation_results[0] else {
        panic!("expected a parallel result");
    };
    let gate = output(&branches[0]);
    assert_eq!(gate["value"], json!("ready"));
    assert!(gate["waited"].as_u64().unwrap() >= 25);
    assert_eq!(store.get("report.status").unwrap(), Some(json!("ready")));
}

#[tokio::test]
async fn test_wait_until_timeout_is_a_driver_failure() {
    let registry = CapabilityRegistry::new()
        .with(Arc::new(WaitDriver::new().with_store(Arc::new(InMemoryKvStore::new()))));
    let p = packet(
        "pkt-wait-timeout",
        &["wait"],
        json!([{"op_name": "wait.until", "arguments": {"key": "never", "interval_ms": 5, "timeout_ms": 15}}]),
    );
    let outcome = Interpreter::new(Arc::new(registry))
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_DRIVER_FAILED");
    assert!(failure.message.contains("timed out after 15 ms"));
}

// ---------------------------------------------------------------------------
// Try / catch / finally
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_catch_handles_recoverable_error_and_finally_runs() {
    let http = Arc::new(ScriptedDriver::new("http"));
    let notification = Arc::new(ScriptedDriver::new("notification"));
    let p = packet(
        "pkt-try",
        &["http", "notification", "transform"],
        json!([{
            "type": "try_catch_finally",
            "try_branch": [
                {"op_name": "http.fail", "arguments": {"message": "boom"}},
                {"op_name": "http.get", "arguments": {"url": "https://never.test"}}
            ],
            "catch_branch": [
                {"op_name": "notification.echo", "arguments": {"code": "{{ error.code }}", "text": "{{ error.message }}"}}
            ],
            "finally_branch": [{"op_name": "transform.set", "arguments": {"value": "cleanup"}}]
        }]),
    );
    let outcome = interpreter(&[http.clone(), notification.clone()])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    match &outcome.operation_results[0] {
        OperationResult::TryCatchFinally {
            status,
            caught,
            error,
            try_results,
            catch_results,
            finally_results,
            ..
        } => {
            assert_eq!(*status, OpStatus::Ok);
            assert!(caught);
            assert_eq!(error.as_ref().unwrap().code, "ERR_DRIVER_FAILED");
            assert_eq!(try_results.len(), 1);
            assert_eq!(catch_results.len(), 1);
            assert_eq!(finally_results.len(), 1);
            assert_eq!(
                finally_results[0].path(),
                "operations[0].finally_branch[0]"
            );
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let calls = notification.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["code"], json!("ERR_DRIVER_FAILED"));
    assert!(calls[0].1["text"].as_str().unwrap().contains("boom"));
    assert_eq!(http.call_count(), 1);
}

#[tokio::test]
async fn test_unauthorized_capability_bypasses_catch_and_finally() {
    let notification = Arc::new(ScriptedDriver::new("notification"));
    let p = packet(
        "pkt-unauth",
        &["transform"],
        json!([
            {
                "type": "try_catch_finally",
                "try_branch": [{"op_name": "notification.show", "arguments": {"message": "hi"}}],
                "catch_branch": [{"op_name": "transform.set", "arguments": {"value": "caught"}}],
                "finally_branch": [{"op_name": "transform.set", "arguments": {"value": "finally"}}]
            },
            {"op_name": "transform.set", "arguments": {"value": "after"}}
        ]),
    );
    let outcome = interpreter(&[notification.clone()])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Failure);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_UNAUTHORIZED_CAPABILITY");
    assert_eq!(
        failure.node_path.as_deref(),
        Some("operations[0].try_branch[0]")
    );
    assert_eq!(outcome.operation_results.len(), 1);
    match &outcome.operation_results[0] {
        OperationResult::TryCatchFinally {
            caught,
            catch_results,
            finally_results,
            ..
        } => {
            assert!(!caught);
            assert!(catch_results.is_empty());
            assert!(finally_results.is_empty());
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(notification.call_count(), 0);
}

#[tokio::test]
async fn test_missing_driver_is_recoverable() {
    let p = packet(
        "pkt-nodriver",
        &["wait", "transform"],
        json!([{
            "type": "try_catch_finally",
            "try_branch": [{"op_name": "wait.sleep", "arguments": {"ms": 1}}],
            "catch_branch": [{"op_name": "transform.set", "arguments": {"value": "{{ error.code }}"}}]
        }]),
    );
    let outcome = interpreter(&[])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    let OperationResult::TryCatchFinally { catch_results, .. } = &outcome.operation_results[0]
    else {
        panic!("expected a try result");
    };
    assert_eq!(
        output(&catch_results[0])["value"],
        json!("ERR_UNKNOWN_CAPABILITY")
    );
}

// ---------------------------------------------------------------------------
// Abort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_abort_from_progress_callback_stops_before_next_node() {
    let p = packet(
        "pkt-abort",
        &["transform"],
        json!([
            {"op_name": "transform.set", "arguments": {"value": 1}},
            {"op_name": "transform.set", "arguments": {"value": 2}},
            {"op_name": "transform.set", "arguments": {"value": 3}}
        ]),
    );
    let abort = AbortHandle::new();
    let observer = AbortAfter {
        abort: abort.clone(),
        after: 1,
    };
    let outcome = interpreter(&[]).run(&p, &observer, &abort).await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.operation_results.len(), 1);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_ABORTED");
    assert_eq!(failure.node_path.as_deref(), Some("operations[1]"));
}

#[tokio::test]
async fn test_pre_aborted_run_has_no_results() {
    let p = packet(
        "pkt-preabort",
        &["transform"],
        json!([{"op_name": "transform.set", "arguments": {"value": 1}}]),
    );
    let abort = AbortHandle::new();
    abort.abort();
    let outcome = interpreter(&[]).run(&p, &NoopObserver, &abort).await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert!(outcome.operation_results.is_empty());
    assert_eq!(outcome.failure.unwrap().code, "ERR_ABORTED");
}

#[tokio::test]
async fn test_abort_after_first_loop_iteration() {
    let p = packet(
        "pkt-abort-loop",
        &["transform"],
        json!([{
            "type": "loop",
            "count": 3,
            "body": [{"op_name": "transform.set", "arguments": {"value": "{{ loop.index }}"}}]
        }]),
    );
    let abort = AbortHandle::new();
    let observer = AbortAfter {
        abort: abort.clone(),
        after: 1,
    };
    let outcome = interpreter(&[]).run(&p, &observer, &abort).await;

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.failure.unwrap().code, "ERR_ABORTED");
    let OperationResult::Loop {
        status,
        total_iterations,
        iterations_completed,
        iterations,
        ..
    } = &outcome.operation_results[0]
    else {
        panic!("expected a loop result");
    };
    assert_eq!(*status, OpStatus::Error);
    assert_eq!(*total_iterations, 3);
    assert_eq!(*iterations_completed, 1);
    assert_eq!(iterations.len(), 1);
    assert_eq!(output(&iterations[0].results[0])["value"], json!(0));
}

#[tokio::test]
async fn test_abort_lets_in_flight_parallel_branch_finish() {
    let slow = Arc::new(ScriptedDriver::new("http").with_latency_ms(40));
    let p = packet(
        "pkt-abort-par",
        &["http", "transform"],
        json!([
            {
                "type": "parallel",
                "branches": [
                    {"op_name": "http.get", "arguments": {"url": "https://slow.test"}},
                    {"op_name": "transform.set", "arguments": {"value": 1}}
                ]
            },
            {"op_name": "transform.set", "arguments": {"value": 2}}
        ]),
    );
    let abort = AbortHandle::new();
    let observer = AbortAfter {
        abort: abort.clone(),
        after: 1,
    };
    let outcome = interpreter(&[slow.clone()]).run(&p, &observer, &abort).await;

    assert!(abort.is_aborted());
    assert_eq!(slow.call_count(), 1);
    assert_eq!(outcome.status, RunStatus::Failure);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.code, "ERR_ABORTED");
    assert_eq!(failure.node_path.as_deref(), Some("operations[1]"));

    assert_eq!(outcome.operation_results.len(), 1);
    let OperationResult::Parallel {
        status, branches, ..
    } = &outcome.operation_results[0]
    else {
        panic!("expected a parallel result");
    };
    assert_eq!(*status, OpStatus::Ok);
    assert_eq!(branches[0].status(), OpStatus::Ok);
    assert_eq!(output(&branches[0])["ok"], json!(true));
}

// ---------------------------------------------------------------------------
// Token ledger and intra-run cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_identical_llm_calls_are_served_from_run_cache() {
    let llm = Arc::new(ScriptedDriver::metered("llm").respond("invoke", json!({"response": "hello"})));
    let p = packet(
        "pkt-llm",
        &["llm"],
        json!([
            {"op_name": "llm.invoke", "arguments": {"prompt": "greet"}},
            {"op_name": "llm.invoke", "arguments": {"prompt": "greet"}},
            {"op_name": "llm.invoke", "arguments": {"prompt": "part"}}
        ]),
    );
    let observer = CollectingObserver::new();
    let outcome = interpreter(&[llm.clone()])
        .run(&p, &observer, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(llm.call_count(), 2);

    let first = output(&outcome.operation_results[0]);
    let second = output(&outcome.operation_results[1]);
    assert!(first.get("cached").is_none());
    assert_eq!(second["cached"], json!(true));
    assert_eq!(second["response"], json!("hello"));

    let ledger = &outcome.ledger;
    assert_eq!(ledger.calls, 2);
    assert_eq!(ledger.input_tokens, 20);
    assert_eq!(ledger.output_tokens, 10);
    assert_eq!(ledger.total_tokens, 30);
    assert_eq!(ledger.saved_tokens, 15);
    assert!((ledger.efficiency_percent - 33.33).abs() < f64::EPSILON);

    assert_eq!(observer.token_updates().len(), 3);
}

#[tokio::test]
async fn test_ledger_is_visible_to_conditions() {
    let llm = Arc::new(ScriptedDriver::metered("llm"));
    let p = packet(
        "pkt-ledger",
        &["llm", "transform"],
        json!([
            {"op_name": "llm.invoke", "arguments": {"prompt": "x"}},
            {"op_name": "transform.set", "arguments": {"value": "{{ ledger.total_tokens }}"}, "run_condition": "ledger.calls == 1"}
        ]),
    );
    let outcome = interpreter(&[llm])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(output(&outcome.operation_results[1])["value"], json!(15));
}

#[tokio::test]
async fn test_concurrent_identical_llm_calls_share_one_invocation() {
    let llm = Arc::new(ScriptedDriver::metered("llm").with_latency_ms(20));
    let p = packet(
        "pkt-llm-par",
        &["llm"],
        json!([{
            "type": "parallel",
            "branches": [
                {"op_name": "llm.invoke", "arguments": {"prompt": "summarize"}},
                {"op_name": "llm.invoke", "arguments": {"prompt": "summarize"}}
            ]
        }]),
    );
    let outcome = interpreter(&[llm.clone()])
        .run(&p, &NoopObserver, &AbortHandle::new())
        .await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(llm.call_count(), 1);
    let OperationResult::Parallel { branches, .. } = &outcome.operation_results[0] else {
        panic!("expected a parallel result");
    };
    let cached = branches
        .iter()
        .filter(|b| output(b).get("cached") == Some(&json!(true)))
        .count();
    assert_eq!(cached, 1);

    assert_eq!(outcome.ledger.calls, 1);
    assert_eq!(outcome.ledger.total_tokens, 15);
    assert_eq!(outcome.ledger.saved_tokens, 15);
}
