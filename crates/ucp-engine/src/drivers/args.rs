//! Argument accessors shared by the built-in drivers

use serde_json::{Map, Value};

use super::DriverError;

pub fn required<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a Value, DriverError> {
    match args.get(key) {
        Some(Value::Null) | None => Err(DriverError::invalid(format!("'{key}' is required"))),
        Some(value) => Ok(value),
    }
}

pub fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, DriverError> {
    required(args, key)?
        .as_str()
        .ok_or_else(|| DriverError::invalid(format!("'{key}' must be a string")))
}

pub fn optional_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, DriverError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DriverError::invalid(format!("'{key}' must be a string"))),
    }
}

/// Non-negative integer; numeric strings are accepted since templated
/// arguments often arrive as text
pub fn optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>, DriverError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| DriverError::invalid(format!("'{key}' must be a non-negative number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DriverError::invalid(format!("'{key}' must be a non-negative number"))),
        Some(_) => Err(DriverError::invalid(format!(
            "'{key}' must be a non-negative number"
        ))),
    }
}

pub fn optional_bool(args: &Map<String, Value>, key: &str) -> Result<Option<bool>, DriverError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(DriverError::invalid(format!("'{key}' must be a boolean"))),
    }
}

/// An array argument; a string holding a JSON array is decoded
pub fn required_array(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Vec<Value>, DriverError> {
    match required(args, key)? {
        Value::Array(items) => Ok(items.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(DriverError::invalid(format!("'{key}' must be an array"))),
        },
        _ => Err(DriverError::invalid(format!("'{key}' must be an array"))),
    }
}

/// Dotted field access into an item (`"user.name"`); empty path is the item
pub fn field<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(item);
    }
    path.split('.').try_fold(item, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
