use serde_json::{Map, Value};

use crate::errors::ValidationError;
use crate::expr::{Expr, DEFAULT_MAX_EXPRESSION_LEN};
use crate::model::operation::split_op_name;
use crate::model::{Packet, PacketBody, KNOWN_CAPABILITIES};
use crate::path::RefPath;
use crate::resolve::references;

/// Stable validation defect codes
pub mod codes {
    pub const MISSING_FIELD: &str = "missing_field";
    pub const INVALID_TYPE: &str = "invalid_type";
    pub const INVALID_VALUE: &str = "invalid_value";
    pub const EMPTY: &str = "empty";
    pub const UNKNOWN_CAPABILITY: &str = "unknown_capability";
    pub const UNKNOWN_NODE_TYPE: &str = "unknown_node_type";
    pub const CONFLICTING_FIELDS: &str = "conflicting_fields";
    pub const CONDITION_SYNTAX: &str = "condition_syntax";
    pub const INVALID_REFERENCE: &str = "invalid_reference";
    pub const TOO_DEEP: &str = "too_deep";
    pub const INVALID_STRUCTURE: &str = "invalid_structure";
}

/// Limits applied while validating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Deepest allowed operation nesting (top-level nodes are depth 1)
    pub max_depth: usize,
    pub max_expression_len: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_expression_len: DEFAULT_MAX_EXPRESSION_LEN,
        }
    }
}

/// Identity fields that a template body must not carry
const IDENTITY_FIELDS: &[&str] = &["id", "issued_at", "signature", "template_id"];

/// Structurally validate a raw packet document.
///
/// Every defect is reported, each with a JSON-path style location. Drivers
/// are never consulted, and capabilities referenced by operations are not
/// checked against `required_capabilities` (that is a runtime error).
///
/// ## Errors
///
/// Returns the full list of `ValidationError`s if the packet is malformed.
pub fn validate(raw: &Value, options: &ValidationOptions) -> Result<Packet, Vec<ValidationError>> {
    let mut v = Validator {
        errors: Vec::new(),
        options: *options,
    };
    v.packet(raw);
    if !v.errors.is_empty() {
        return Err(v.errors);
    }

    let mut normalized = raw.clone();
    normalize_forest(normalized.get_mut("operations"));
    serde_json::from_value::<Packet>(normalized).map_err(|e| {
        vec![ValidationError::new(
            "$",
            codes::INVALID_STRUCTURE,
            e.to_string(),
        )]
    })
}

/// Validate a template packet body (a packet without identity fields).
///
/// ## Errors
///
/// Returns `ValidationError`s for any structural defect, and for identity
/// fields present in the body.
pub fn validate_body(
    raw: &Value,
    options: &ValidationOptions,
) -> Result<PacketBody, Vec<ValidationError>> {
    let Some(obj) = raw.as_object() else {
        return Err(vec![ValidationError::new(
            "$",
            codes::INVALID_TYPE,
            "packet body must be an object",
        )]);
    };

    let identity_errors: Vec<ValidationError> = IDENTITY_FIELDS
        .iter()
        .filter(|field| obj.contains_key(**field))
        .map(|field| {
            ValidationError::new(
                *field,
                codes::INVALID_VALUE,
                "identity fields are assigned at instantiation",
            )
        })
        .collect();

    let mut with_identity = obj.clone();
    with_identity.insert("id".to_string(), Value::String("template-body".to_string()));

    match validate(&Value::Object(with_identity), options) {
        Ok(packet) if identity_errors.is_empty() => Ok(packet.body()),
        Ok(_) => Err(identity_errors),
        Err(mut errors) => {
            errors.extend(identity_errors);
            Err(errors)
        }
    }
}

/// Insert the implicit `"type": "standard"` on untyped nodes
fn normalize_forest(nodes: Option<&mut Value>) {
    let Some(Value::Array(items)) = nodes else {
        return;
    };
    for node in items {
        let Value::Object(map) = node else { continue };
        if !map.contains_key("type") {
            map.insert("type".to_string(), Value::String("standard".to_string()));
        }
        for child in [
            "then_branch",
            "else_branch",
            "body",
            "branches",
            "try_branch",
            "catch_branch",
            "finally_branch",
        ] {
            normalize_forest(map.get_mut(child));
        }
    }
}

struct Validator {
    errors: Vec<ValidationError>,
    options: ValidationOptions,
}

impl Validator {
    fn push(&mut self, path: impl Into<String>, code: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(path, code, message));
    }

    fn packet(&mut self, raw: &Value) {
        let Some(obj) = raw.as_object() else {
            self.push("$", codes::INVALID_TYPE, "packet must be an object");
            return;
        };

        self.required_string(obj, "protocol_version", "protocol_version");
        self.required_string(obj, "id", "id");

        match obj.get("ttl_seconds") {
            None => self.push("ttl_seconds", codes::MISSING_FIELD, "ttl_seconds is required"),
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => {}
                _ => self.push(
                    "ttl_seconds",
                    codes::INVALID_VALUE,
                    "ttl_seconds must be a positive integer",
                ),
            },
        }

        if let Some(v) = obj.get("issued_at") {
            if !v.is_null() && v.as_u64().is_none() {
                self.push(
                    "issued_at",
                    codes::INVALID_TYPE,
                    "issued_at must be epoch milliseconds",
                );
            }
        }

        self.capabilities(obj.get("required_capabilities"));
        self.string_list(obj.get("declared_permissions"), "declared_permissions", false);
        self.metadata(obj.get("metadata"));
        self.optional_string(obj, "signature", "signature");
        self.optional_string(obj, "template_id", "template_id");

        match obj.get("operations") {
            None => self.push("operations", codes::MISSING_FIELD, "operations is required"),
            Some(ops) => self.forest(ops, "operations", 1, true),
        }
    }

    fn required_string(&mut self, obj: &Map<String, Value>, field: &str, path: &str) {
        match obj.get(field) {
            None => self.push(path, codes::MISSING_FIELD, format!("{} is required", field)),
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => {
                self.push(path, codes::EMPTY, format!("{} must not be empty", field))
            }
            Some(_) => self.push(path, codes::INVALID_TYPE, format!("{} must be a string", field)),
        }
    }

    fn optional_string(&mut self, obj: &Map<String, Value>, field: &str, path: &str) {
        match obj.get(field) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => self.push(path, codes::INVALID_TYPE, format!("{} must be a string", field)),
        }
    }

    fn string_list(&mut self, value: Option<&Value>, path: &str, non_empty: bool) -> Vec<String> {
        let Some(value) = value else {
            self.push(path, codes::MISSING_FIELD, format!("{} is required", path));
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            self.push(path, codes::INVALID_TYPE, format!("{} must be an array", path));
            return Vec::new();
        };
        if non_empty && items.is_empty() {
            self.push(path, codes::EMPTY, format!("{} must not be empty", path));
        }
        let mut out = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) => out.push(s.to_string()),
                None => self.push(
                    format!("{}[{}]", path, i),
                    codes::INVALID_TYPE,
                    "entries must be strings",
                ),
            }
        }
        out
    }

    fn capabilities(&mut self, value: Option<&Value>) {
        let names = self.string_list(value, "required_capabilities", true);
        for (i, name) in names.iter().enumerate() {
            if !KNOWN_CAPABILITIES.contains(&name.as_str()) {
                self.push(
                    format!("required_capabilities[{}]", i),
                    codes::UNKNOWN_CAPABILITY,
                    format!("unknown capability '{}'", name),
                );
            }
        }
    }

    fn metadata(&mut self, value: Option<&Value>) {
        let Some(value) = value else {
            self.push("metadata", codes::MISSING_FIELD, "metadata is required");
            return;
        };
        let Some(obj) = value.as_object() else {
            self.push("metadata", codes::INVALID_TYPE, "metadata must be an object");
            return;
        };
        self.required_string(obj, "name", "metadata.name");
        self.required_string(obj, "owner", "metadata.owner");
        self.optional_string(obj, "description", "metadata.description");
        self.optional_string(obj, "provenance", "metadata.provenance");
    }

    fn forest(&mut self, value: &Value, path: &str, depth: usize, non_empty: bool) {
        let Some(nodes) = value.as_array() else {
            self.push(path, codes::INVALID_TYPE, format!("{} must be an array", path));
            return;
        };
        if non_empty && nodes.is_empty() {
            self.push(path, codes::EMPTY, format!("{} must not be empty", path));
        }
        for (i, node) in nodes.iter().enumerate() {
            self.node(node, &format!("{}[{}]", path, i), depth);
        }
    }

    fn child_forest(
        &mut self,
        obj: &Map<String, Value>,
        field: &str,
        path: &str,
        depth: usize,
        required: bool,
        non_empty: bool,
    ) {
        let child_path = format!("{}.{}", path, field);
        match obj.get(field) {
            None if required => self.push(
                child_path,
                codes::MISSING_FIELD,
                format!("{} is required", field),
            ),
            None => {}
            Some(v) => self.forest(v, &child_path, depth + 1, non_empty),
        }
    }

    fn node(&mut self, value: &Value, path: &str, depth: usize) {
        if depth > self.options.max_depth {
            self.push(
                path,
                codes::TOO_DEEP,
                format!("operations nest deeper than {}", self.options.max_depth),
            );
            return;
        }
        let Some(obj) = value.as_object() else {
            self.push(path, codes::INVALID_TYPE, "operation must be an object");
            return;
        };

        if let Some(id) = obj.get("id") {
            match id.as_str() {
                Some(s) if !s.trim().is_empty() => {}
                _ => self.push(
                    format!("{}.id", path),
                    codes::INVALID_VALUE,
                    "id must be a non-empty string",
                ),
            }
        }

        let node_type = match obj.get("type") {
            None => "standard",
            Some(Value::String(t)) => t.as_str(),
            Some(_) => {
                self.push(format!("{}.type", path), codes::INVALID_TYPE, "type must be a string");
                return;
            }
        };

        match node_type {
            "standard" => self.standard(obj, path),
            "conditional" => {
                match obj.get("condition") {
                    None => self.push(
                        format!("{}.condition", path),
                        codes::MISSING_FIELD,
                        "condition is required",
                    ),
                    Some(c) => self.condition(c, &format!("{}.condition", path)),
                }
                self.child_forest(obj, "then_branch", path, depth, true, false);
                self.child_forest(obj, "else_branch", path, depth, false, false);
            }
            "loop" => {
                self.iteration_spec(obj, path);
                for var in ["item_var", "index_var"] {
                    if let Some(v) = obj.get(var) {
                        self.loop_var(v, &format!("{}.{}", path, var));
                    }
                }
                if let (Some(a), Some(b)) = (obj.get("item_var"), obj.get("index_var")) {
                    if a == b {
                        self.push(
                            format!("{}.index_var", path),
                            codes::CONFLICTING_FIELDS,
                            "item_var and index_var must differ",
                        );
                    }
                }
                for field in ["continue_if", "break_if"] {
                    if let Some(c) = obj.get(field) {
                        self.condition(c, &format!("{}.{}", path, field));
                    }
                }
                self.child_forest(obj, "body", path, depth, true, true);
            }
            "parallel" => self.child_forest(obj, "branches", path, depth, true, true),
            "try_catch_finally" => {
                self.child_forest(obj, "try_branch", path, depth, true, true);
                self.child_forest(obj, "catch_branch", path, depth, false, false);
                self.child_forest(obj, "finally_branch", path, depth, false, false);
            }
            other => self.push(
                format!("{}.type", path),
                codes::UNKNOWN_NODE_TYPE,
                format!("unknown operation type '{}'", other),
            ),
        }
    }

    fn standard(&mut self, obj: &Map<String, Value>, path: &str) {
        let op_path = format!("{}.op_name", path);
        match obj.get("op_name") {
            None => self.push(op_path, codes::MISSING_FIELD, "op_name is required"),
            Some(Value::String(name)) => {
                if split_op_name(name).is_none() {
                    self.push(
                        op_path,
                        codes::INVALID_VALUE,
                        format!("op_name '{}' must be '<capability>.<action>'", name),
                    );
                }
            }
            Some(_) => self.push(op_path, codes::INVALID_TYPE, "op_name must be a string"),
        }

        match obj.get("arguments") {
            None => {}
            Some(Value::Object(args)) => {
                for (key, value) in args {
                    self.placeholders(value, &format!("{}.arguments.{}", path, key));
                }
            }
            Some(_) => self.push(
                format!("{}.arguments", path),
                codes::INVALID_TYPE,
                "arguments must be an object",
            ),
        }

        for field in ["run_condition", "skip_condition"] {
            if let Some(c) = obj.get(field) {
                self.condition(c, &format!("{}.{}", path, field));
            }
        }
    }

    fn condition(&mut self, value: &Value, path: &str) {
        match value {
            Value::Bool(_) => {}
            Value::String(source) => {
                if let Err(e) = Expr::parse(source, self.options.max_expression_len) {
                    self.push(path, codes::CONDITION_SYNTAX, e.to_string());
                }
            }
            _ => self.push(
                path,
                codes::INVALID_TYPE,
                "condition must be a boolean or an expression string",
            ),
        }
    }

    fn placeholders(&mut self, value: &Value, path: &str) {
        match value {
            Value::String(s) => {
                for reference in references(s) {
                    if let Err(reason) = RefPath::parse(&reference) {
                        self.push(path, codes::INVALID_REFERENCE, reason);
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.placeholders(item, &format!("{}[{}]", path, i));
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    self.placeholders(item, &format!("{}.{}", path, key));
                }
            }
            _ => {}
        }
    }

    fn iteration_spec(&mut self, obj: &Map<String, Value>, path: &str) {
        let present: Vec<&str> = ["count", "items", "items_from", "range"]
            .into_iter()
            .filter(|k| obj.contains_key(*k))
            .collect();

        match present.as_slice() {
            [] => {
                self.push(
                    path,
                    codes::MISSING_FIELD,
                    "loop requires one of count, items, items_from, range",
                );
                return;
            }
            [_] => {}
            _ => {
                self.push(
                    path,
                    codes::CONFLICTING_FIELDS,
                    format!("loop has multiple iteration specs: {}", present.join(", ")),
                );
                return;
            }
        }

        let field_path = format!("{}.{}", path, present[0]);
        let value = &obj[present[0]];
        match present[0] {
            "count" => {
                if value.as_u64().is_none() {
                    self.push(
                        field_path,
                        codes::INVALID_VALUE,
                        "count must be a non-negative integer",
                    );
                }
            }
            "items" => {
                if !value.is_array() {
                    self.push(field_path, codes::INVALID_TYPE, "items must be an array");
                }
            }
            "items_from" => match value.as_str() {
                Some(reference) => {
                    if let Err(reason) = RefPath::parse(reference) {
                        self.push(field_path, codes::INVALID_REFERENCE, reason);
                    }
                }
                None => self.push(
                    field_path,
                    codes::INVALID_TYPE,
                    "items_from must be a reference path",
                ),
            },
            _ => {
                let start = value.get("start").and_then(Value::as_i64);
                let end = value.get("end").and_then(Value::as_i64);
                match (start, end) {
                    (Some(s), Some(e)) if s <= e => {}
                    (Some(_), Some(_)) => {
                        self.push(field_path, codes::INVALID_VALUE, "range start exceeds end")
                    }
                    _ => self.push(
                        field_path,
                        codes::INVALID_TYPE,
                        "range must be {start, end} integers",
                    ),
                }
            }
        }
    }

    fn loop_var(&mut self, value: &Value, path: &str) {
        const RESERVED: &[&str] = &["first", "last", "length"];
        match value.as_str() {
            Some(name)
                if !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                if RESERVED.contains(&name) {
                    self.push(
                        path,
                        codes::INVALID_VALUE,
                        format!("'{}' is reserved for loop metadata", name),
                    );
                }
            }
            _ => self.push(
                path,
                codes::INVALID_VALUE,
                "loop variable must be a non-empty identifier",
            ),
        }
    }
}
