use std::collections::BTreeMap;

use crate::model::{OperationNode, Packet};

/// Visit every node of `nodes` with its path, parents before children
pub fn walk_nodes<'a>(
    nodes: &'a [OperationNode],
    path: &str,
    visit: &mut dyn FnMut(&'a OperationNode, &str),
) {
    for (i, node) in nodes.iter().enumerate() {
        let node_path = format!("{}[{}]", path, i);
        visit(node, &node_path);
        match node {
            OperationNode::Standard(_) => {}
            OperationNode::Conditional(op) => {
                walk_nodes(&op.then_branch, &format!("{}.then_branch", node_path), visit);
                walk_nodes(&op.else_branch, &format!("{}.else_branch", node_path), visit);
            }
            OperationNode::Loop(op) => {
                walk_nodes(&op.body, &format!("{}.body", node_path), visit);
            }
            OperationNode::Parallel(op) => {
                walk_nodes(&op.branches, &format!("{}.branches", node_path), visit);
            }
            OperationNode::TryCatchFinally(op) => {
                walk_nodes(&op.try_branch, &format!("{}.try_branch", node_path), visit);
                walk_nodes(&op.catch_branch, &format!("{}.catch_branch", node_path), visit);
                walk_nodes(&op.finally_branch, &format!("{}.finally_branch", node_path), visit);
            }
        }
    }
}

/// Find standard operations whose capability the packet does not declare
///
/// These packets validate but fail at runtime with an unauthorized
/// capability error.
///
/// Returns list of (node_path, capability) tuples
pub fn find_undeclared_capabilities(packet: &Packet) -> Vec<(String, String)> {
    let mut found = Vec::new();
    walk_nodes(&packet.operations, "operations", &mut |node, path| {
        if let OperationNode::Standard(op) = node {
            if let Some((capability, _)) = op.capability_action() {
                if !packet.declares(capability) {
                    found.push((path.to_string(), capability.to_string()));
                }
            }
        }
    });
    found
}

/// Find node ids used at more than one location
///
/// A later node overwrites an earlier one in `ops.<id>` lookups, which is
/// usually a mistake outside loop bodies.
///
/// Returns map of id → node paths
pub fn find_duplicate_ids(packet: &Packet) -> BTreeMap<String, Vec<String>> {
    let mut seen: BTreeMap<String, Vec<String>> = BTreeMap::new();
    walk_nodes(&packet.operations, "operations", &mut |node, path| {
        if let Some(id) = node.id() {
            seen.entry(id.to_string()).or_default().push(path.to_string());
        }
    });
    seen.retain(|_, paths| paths.len() > 1);
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::validation::{validate, ValidationOptions};
    use serde_json::json;

    fn packet(operations: serde_json::Value) -> Packet {
        validate(
            &json!({
                "protocol_version": "0.1",
                "id": "pkt-1",
                "ttl_seconds": 60,
                "required_capabilities": ["transform"],
                "declared_permissions": [],
                "metadata": {"name": "n", "owner": "o"},
                "operations": operations
            }),
            &ValidationOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_find_undeclared_capabilities_nested() {
        let p = packet(json!([
            {"op_name": "transform.set"},
            {"type": "parallel", "branches": [
                {"op_name": "transform.set"},
                {"op_name": "http.get"}
            ]}
        ]));
        assert_eq!(
            find_undeclared_capabilities(&p),
            vec![("operations[1].branches[1]".to_string(), "http".to_string())]
        );
    }

    #[test]
    fn test_find_duplicate_ids() {
        let p = packet(json!([
            {"op_name": "transform.set", "id": "a"},
            {"type": "try_catch_finally",
             "try_branch": [{"op_name": "transform.set", "id": "a"}],
             "finally_branch": [{"op_name": "transform.set", "id": "b"}]}
        ]));
        let dups = find_duplicate_ids(&p);
        assert_eq!(dups.len(), 1);
        assert_eq!(
            dups["a"],
            vec![
                "operations[0]".to_string(),
                "operations[1].try_branch[0]".to_string()
            ]
        );
    }
}
