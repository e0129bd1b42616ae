//! Canonical schema constants for structured logging
//!
//! Every crate logs through these keys so that run traces can be filtered
//! uniformly (e.g. all events for one `packet_id`).

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_RUN_ID: &str = "run_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_PACKET_ID: &str = "packet_id";
pub const FIELD_RECEIPT_ID: &str = "receipt_id";
pub const FIELD_TEMPLATE_ID: &str = "template_id";
pub const FIELD_NODE_PATH: &str = "node_path";
pub const FIELD_OP_NAME: &str = "op_name";
pub const FIELD_CAPABILITY: &str = "capability";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
