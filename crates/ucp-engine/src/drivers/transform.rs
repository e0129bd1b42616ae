//! `transform` capability: pure data shaping, no I/O
//!
//! | action  | arguments                                  | output             |
//! |---------|--------------------------------------------|--------------------|
//! | map     | `items`, `field`                           | `{items, count}`   |
//! | filter  | `items`, `field`, `op`, `value`            | `{items, count}`   |
//! | reduce  | `items`, `op`, `field?`, `initial?`        | `{result, count}`  |
//! | set     | `value` and/or `merge` (list of objects)   | `{value}`          |
//! | concat  | `items`, `separator` (default `""`)        | `{result}`         |
//! | split   | `value`, `separator` (default `","`)       | `{items, count}`   |
//! | json    | `value`, `parse?`                          | `{result}`         |

use async_trait::async_trait;
use serde_json::{json, Map, Number, Value};
use std::cmp::Ordering;

use ucp_core_types::RequestContext;

use super::args::{field, optional_bool, optional_str, required, required_array};
use super::{Driver, DriverError};

const ACTIONS: &[&str] = &["map", "filter", "reduce", "set", "concat", "split", "json"];
const FILTER_OPS: &[&str] = &["exists", "eq", "neq", "gt", "gte", "lt", "lte", "contains"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformDriver;

impl TransformDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for TransformDriver {
    fn capability(&self) -> &str {
        "transform"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Value, DriverError> {
        match action {
            "map" => map(args),
            "filter" => filter(args),
            "reduce" => reduce(args),
            "set" => set(args),
            "concat" => concat(args),
            "split" => split(args),
            "json" => json_codec(args),
            other => Err(DriverError::UnknownAction(other.to_string())),
        }
    }
}

fn map(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let items = required_array(args, "items")?;
    let path = optional_str(args, "field")?.unwrap_or("");
    let mapped: Vec<Value> = items
        .iter()
        .map(|item| field(item, path).cloned().unwrap_or(Value::Null))
        .collect();
    Ok(json!({"count": mapped.len(), "items": mapped}))
}

fn filter(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let items = required_array(args, "items")?;
    let path = optional_str(args, "field")?.unwrap_or("");
    let expected = args.get("value");
    let op = optional_str(args, "op")?.unwrap_or(if expected.is_some() { "eq" } else { "exists" });
    if !FILTER_OPS.contains(&op) {
        return Err(DriverError::invalid(format!("unknown filter op '{op}'")));
    }

    let mut kept = Vec::new();
    for item in items {
        let actual = field(&item, path);
        if matches_filter(op, actual, expected)? {
            kept.push(item);
        }
    }
    Ok(json!({"count": kept.len(), "items": kept}))
}

fn matches_filter(
    op: &str,
    actual: Option<&Value>,
    expected: Option<&Value>,
) -> Result<bool, DriverError> {
    let actual = actual.unwrap_or(&Value::Null);
    let expected = expected.unwrap_or(&Value::Null);
    Ok(match op {
        "exists" => !actual.is_null(),
        "eq" => loosely_equal(actual, expected),
        "neq" => !loosely_equal(actual, expected),
        "gt" => compare(actual, expected) == Some(Ordering::Greater),
        "gte" => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "lt" => compare(actual, expected) == Some(Ordering::Less),
        "lte" => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "contains" => match (actual, expected) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| loosely_equal(i, needle)),
            _ => false,
        },
        other => return Err(DriverError::invalid(format!("unknown filter op '{other}'"))),
    })
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn reduce(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let items = required_array(args, "items")?;
    let op = optional_str(args, "op")?.unwrap_or("sum");
    let path = optional_str(args, "field")?.unwrap_or("");
    let values: Vec<Value> = items
        .iter()
        .filter_map(|item| field(item, path).cloned())
        .collect();
    let numbers = || values.iter().filter_map(Value::as_f64);
    let initial = args.get("initial").cloned();

    let result = match op {
        "sum" => {
            let start = initial.as_ref().and_then(Value::as_f64).unwrap_or(0.0);
            number(start + numbers().sum::<f64>())
        }
        "avg" => {
            let count = numbers().count();
            if count == 0 {
                Value::Null
            } else {
                number(numbers().sum::<f64>() / count as f64)
            }
        }
        "min" => numbers().reduce(f64::min).map_or(Value::Null, number),
        "max" => numbers().reduce(f64::max).map_or(Value::Null, number),
        "count" => json!(values.len()),
        "concat" => {
            let separator = optional_str(args, "separator")?.unwrap_or("");
            Value::String(
                values
                    .iter()
                    .map(text)
                    .collect::<Vec<_>>()
                    .join(separator),
            )
        }
        "first" => values.first().cloned().or(initial).unwrap_or(Value::Null),
        "last" => values.last().cloned().or(initial).unwrap_or(Value::Null),
        other => return Err(DriverError::invalid(format!("unknown reduce op '{other}'"))),
    };
    Ok(json!({"result": result, "count": items.len()}))
}

/// Integral results stay integers so `sum` of `[1, 2]` is `3`, not `3.0`
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn set(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let mut value = args.get("value").cloned().unwrap_or(Value::Null);
    if let Some(merge) = args.get("merge") {
        let parts = merge
            .as_array()
            .ok_or_else(|| DriverError::invalid("'merge' must be a list of objects"))?;
        let mut merged = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(DriverError::invalid("'value' must be an object when merging")),
        };
        for part in parts {
            let part = part
                .as_object()
                .ok_or_else(|| DriverError::invalid("'merge' must be a list of objects"))?;
            merged.extend(part.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        value = Value::Object(merged);
    }
    Ok(json!({"value": value}))
}

fn concat(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let items = required_array(args, "items")?;
    let separator = optional_str(args, "separator")?.unwrap_or("");
    let result = items.iter().map(text).collect::<Vec<_>>().join(separator);
    Ok(json!({"result": result}))
}

fn split(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let value = required(args, "value")?
        .as_str()
        .ok_or_else(|| DriverError::invalid("'value' must be a string"))?;
    let separator = optional_str(args, "separator")?.unwrap_or(",");
    if separator.is_empty() {
        return Err(DriverError::invalid("'separator' must not be empty"));
    }
    let items: Vec<Value> = value
        .split(separator)
        .map(|part| Value::String(part.trim().to_string()))
        .collect();
    Ok(json!({"count": items.len(), "items": items}))
}

fn json_codec(args: &Map<String, Value>) -> Result<Value, DriverError> {
    let value = required(args, "value")?;
    let parse = optional_bool(args, "parse")?.unwrap_or(value.is_string());
    let result = if parse {
        let source = value
            .as_str()
            .ok_or_else(|| DriverError::invalid("'value' must be a string to parse"))?;
        serde_json::from_str(source)
            .map_err(|e| DriverError::failed(format!("invalid JSON: {e}")))?
    } else {
        Value::String(value.to_string())
    };
    Ok(json!({"result": result}))
}
