//! Argument templating
//!
//! String arguments may embed `{{ path }}` placeholders. A string that is
//! exactly one placeholder becomes the referenced JSON value; otherwise each
//! placeholder is interpolated as text.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::errors::UcpError;
use crate::path::{RefPath, Scope};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Resolve every placeholder inside an argument object.
///
/// ## Errors
///
/// Returns `UcpError::ArgumentResolution` for malformed paths and for paths
/// that do not resolve in `scope`.
pub fn resolve_arguments(
    arguments: &Map<String, Value>,
    scope: &dyn Scope,
) -> Result<Map<String, Value>, UcpError> {
    arguments
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, scope)?)))
        .collect()
}

/// Resolve placeholders anywhere inside `value`
pub fn resolve_value(value: &Value, scope: &dyn Scope) -> Result<Value, UcpError> {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_arguments(map, scope).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve one reference path to a value.
///
/// ## Errors
///
/// Returns `UcpError::ArgumentResolution` if the path is malformed or
/// missing from `scope`.
pub fn resolve_reference(reference: &str, scope: &dyn Scope) -> Result<Value, UcpError> {
    let path = RefPath::parse(reference).map_err(|reason| UcpError::ArgumentResolution {
        reference: reference.to_string(),
        reason,
    })?;
    scope
        .lookup(&path)
        .ok_or_else(|| UcpError::ArgumentResolution {
            reference: reference.to_string(),
            reason: "no such value in scope".to_string(),
        })
}

fn resolve_string(s: &str, scope: &dyn Scope) -> Result<Value, UcpError> {
    let re = placeholder_regex();

    if let Some(caps) = re.captures(s) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == s.len() {
                let reference = caps.get(1).map_or("", |m| m.as_str());
                return resolve_reference(reference, scope);
            }
        }
    } else {
        return Ok(Value::String(s.to_string()));
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        out.push_str(&as_text(&resolve_reference(inner.as_str(), scope)?));
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

/// Text form used for interpolation: strings unquoted, everything else JSON
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Placeholder references in `s`, for validation
pub fn references(s: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(s)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
