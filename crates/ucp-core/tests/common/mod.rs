use serde_json::{json, Value};
use ucp_core::{validate, Packet, ValidationOptions};

/// A well-formed packet document with the given operations
#[allow(dead_code)]
pub fn packet_json(capabilities: &[&str], operations: Value) -> Value {
    json!({
        "protocol_version": "0.1",
        "id": "pkt-test",
        "ttl_seconds": 3600,
        "required_capabilities": capabilities,
        "declared_permissions": ["network"],
        "metadata": {"name": "Test packet", "owner": "tests@example.com"},
        "operations": operations
    })
}

/// Validate a packet document, panicking on errors
#[allow(dead_code)]
pub fn packet(capabilities: &[&str], operations: Value) -> Packet {
    validate(
        &packet_json(capabilities, operations),
        &ValidationOptions::default(),
    )
    .unwrap()
}

/// The three-step sequential packet used across suites
#[allow(dead_code)]
pub fn sequential_packet() -> Packet {
    packet(
        &["http", "local_storage", "notification"],
        json!([
            {"op_name": "http.get", "id": "fetch", "arguments": {"url": "https://example.com/api"}},
            {"op_name": "local_storage.put", "id": "save", "arguments": {"key": "last", "value": "{{ ops.fetch.output }}"}},
            {"op_name": "notification.show", "id": "toast", "arguments": {"title": "Done"}}
        ]),
    )
}
