//! Execution context visible to conditions and argument templates

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::errors::OperationError;
use crate::ledger::LedgerSnapshot;
use crate::model::OpStatus;
use crate::path::{walk, PathRoot, RefPath, Scope};

/// Outcome of a node with an `id`, addressable as `ops.<id>`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub status: OpStatus,
    pub output: Option<Value>,
    pub error: Option<OperationError>,
}

impl StoredResult {
    fn to_value(&self) -> Value {
        json!({
            "status": self.status,
            "output": self.output.clone().unwrap_or(Value::Null),
            "error": self.error,
        })
    }
}

/// Results of every identified node that has finished so far in a run
///
/// A later node with the same id replaces the earlier entry (loop bodies
/// re-run their nodes each iteration).
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    entries: HashMap<String, StoredResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, result: StoredResult) {
        self.entries.insert(id.into(), result);
    }

    pub fn get(&self, id: &str) -> Option<&StoredResult> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loop variables in scope: the innermost loop's bindings layered over its
/// ancestors'
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopFrame {
    vars: Map<String, Value>,
}

impl LoopFrame {
    pub fn root() -> Self {
        Self::default()
    }

    /// Bindings for iteration `index` of `length` over `item`
    pub fn child(
        &self,
        item_var: &str,
        index_var: &str,
        item: Value,
        index: usize,
        length: usize,
    ) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(item_var.to_string(), item);
        vars.insert(index_var.to_string(), json!(index));
        vars.insert("first".to_string(), json!(index == 0));
        vars.insert("last".to_string(), json!(index + 1 == length));
        vars.insert("length".to_string(), json!(length));
        Self { vars }
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }
}

/// Read-only view used to evaluate one condition or resolve one argument set
pub struct EvalContext<'a> {
    pub results: &'a ResultStore,
    pub loop_frame: &'a LoopFrame,
    pub ledger: &'a LedgerSnapshot,
    pub error: Option<&'a OperationError>,
}

impl Scope for EvalContext<'_> {
    fn lookup(&self, path: &RefPath) -> Option<Value> {
        match path.root {
            PathRoot::Ops => {
                let (first, rest) = path.segments.split_first()?;
                let id = match first {
                    crate::path::Segment::Key(id) => id,
                    crate::path::Segment::Index(_) => return None,
                };
                let stored = self.results.get(id)?.to_value();
                walk(&stored, rest).cloned()
            }
            PathRoot::Loop => {
                let vars = Value::Object(self.loop_frame.vars().clone());
                walk(&vars, &path.segments).cloned()
            }
            PathRoot::Ledger => {
                let ledger = serde_json::to_value(self.ledger).ok()?;
                walk(&ledger, &path.segments).cloned()
            }
            PathRoot::Error => {
                let error = serde_json::to_value(self.error?).ok()?;
                walk(&error, &path.segments).cloned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;

    fn lookup(ctx: &EvalContext<'_>, path: &str) -> Option<Value> {
        ctx.lookup(&RefPath::parse(path).unwrap())
    }

    #[test]
    fn test_ops_lookup() {
        let mut results = ResultStore::new();
        results.insert(
            "fetch",
            StoredResult {
                status: OpStatus::Ok,
                output: Some(json!({"items": [10, 20]})),
                error: None,
            },
        );
        let frame = LoopFrame::root();
        let ledger = LedgerSnapshot::default();
        let ctx = EvalContext {
            results: &results,
            loop_frame: &frame,
            ledger: &ledger,
            error: None,
        };

        assert_eq!(lookup(&ctx, "ops.fetch.status"), Some(json!("OK")));
        assert_eq!(lookup(&ctx, "ops.fetch.output.items[1]"), Some(json!(20)));
        assert_eq!(lookup(&ctx, "ops.fetch.error"), Some(Value::Null));
        assert_eq!(lookup(&ctx, "ops.other.status"), None);
        assert_eq!(lookup(&ctx, "error.code"), None);
        assert_eq!(lookup(&ctx, "ledger.calls"), Some(json!(0)));
    }

    #[test]
    fn test_loop_frames_nest() {
        let outer = LoopFrame::root().child("row", "i", json!("a"), 0, 2);
        let inner = outer.child("cell", "j", json!(7), 2, 3);
        let results = ResultStore::new();
        let ledger = LedgerSnapshot::default();
        let ctx = EvalContext {
            results: &results,
            loop_frame: &inner,
            ledger: &ledger,
            error: None,
        };

        assert_eq!(lookup(&ctx, "loop.row"), Some(json!("a")));
        assert_eq!(lookup(&ctx, "loop.cell"), Some(json!(7)));
        assert_eq!(lookup(&ctx, "loop.j"), Some(json!(2)));
        assert_eq!(lookup(&ctx, "loop.last"), Some(json!(true)));
        assert_eq!(lookup(&ctx, "loop.length"), Some(json!(3)));
    }

    #[test]
    fn test_error_scope() {
        let results = ResultStore::new();
        let frame = LoopFrame::root();
        let ledger = LedgerSnapshot::default();
        let error = OperationError::new(ExErrorKind::DriverFailed, "boom");
        let ctx = EvalContext {
            results: &results,
            loop_frame: &frame,
            ledger: &ledger,
            error: Some(&error),
        };
        assert_eq!(lookup(&ctx, "error.code"), Some(json!("ERR_DRIVER_FAILED")));
        assert_eq!(lookup(&ctx, "error.message"), Some(json!("boom")));
    }
}
