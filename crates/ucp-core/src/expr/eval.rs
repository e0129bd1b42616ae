use serde_json::Value;

use super::{CompareOp, Expr};
use crate::path::Scope;

pub(super) fn evaluate(expr: &Expr, scope: &dyn Scope) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(path) => scope.lookup(path).unwrap_or(Value::Null),
        Expr::Exists(path) => Value::Bool(scope.lookup(path).is_some_and(|v| !v.is_null())),
        Expr::Not(inner) => Value::Bool(!is_truthy(&evaluate(inner, scope))),
        Expr::And(left, right) => Value::Bool(
            is_truthy(&evaluate(left, scope)) && is_truthy(&evaluate(right, scope)),
        ),
        Expr::Or(left, right) => Value::Bool(
            is_truthy(&evaluate(left, scope)) || is_truthy(&evaluate(right, scope)),
        ),
        Expr::Compare(op, left, right) => {
            let l = evaluate(left, scope);
            let r = evaluate(right, scope);
            Value::Bool(compare(*op, &l, &r))
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => numeric(left, right, |a, b| a > b),
        CompareOp::Ge => numeric(left, right, |a, b| a >= b),
        CompareOp::Lt => numeric(left, right, |a, b| a < b),
        CompareOp::Le => numeric(left, right, |a, b| a <= b),
        CompareOp::Contains => contains(left, right),
        CompareOp::In => contains(right, left),
    }
}

/// Ordering only applies to two numbers
fn numeric(left: &Value, right: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            Value::Number(n) => s.contains(&n.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

/// JSON equality where numbers compare by value (`1 == 1.0`)
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are false; everything else true
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
