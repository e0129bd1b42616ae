use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a packet's operation tree
///
/// Serialized with a `"type"` tag (`standard`, `conditional`, `loop`,
/// `parallel`, `try_catch_finally`). Sibling order is significant in every
/// sequential context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationNode {
    Standard(StandardOp),
    Conditional(ConditionalOp),
    Loop(LoopOp),
    Parallel(ParallelOp),
    TryCatchFinally(TryCatchFinallyOp),
}

impl OperationNode {
    pub fn id(&self) -> Option<&str> {
        match self {
            OperationNode::Standard(op) => op.id.as_deref(),
            OperationNode::Conditional(op) => op.id.as_deref(),
            OperationNode::Loop(op) => op.id.as_deref(),
            OperationNode::Parallel(op) => op.id.as_deref(),
            OperationNode::TryCatchFinally(op) => op.id.as_deref(),
        }
    }

    /// Wire name of the node kind
    pub fn kind(&self) -> &'static str {
        match self {
            OperationNode::Standard(_) => "standard",
            OperationNode::Conditional(_) => "conditional",
            OperationNode::Loop(_) => "loop",
            OperationNode::Parallel(_) => "parallel",
            OperationNode::TryCatchFinally(_) => "try_catch_finally",
        }
    }

    /// Number of nodes in this subtree, counting loop bodies once
    pub fn node_count(&self) -> usize {
        1 + match self {
            OperationNode::Standard(_) => 0,
            OperationNode::Conditional(op) => {
                count_nodes(&op.then_branch) + count_nodes(&op.else_branch)
            }
            OperationNode::Loop(op) => count_nodes(&op.body),
            OperationNode::Parallel(op) => count_nodes(&op.branches),
            OperationNode::TryCatchFinally(op) => {
                count_nodes(&op.try_branch)
                    + count_nodes(&op.catch_branch)
                    + count_nodes(&op.finally_branch)
            }
        }
    }
}

/// Total node count of a forest
pub fn count_nodes(nodes: &[OperationNode]) -> usize {
    nodes.iter().map(OperationNode::node_count).sum()
}

/// Driver-backed action, `op_name` is `"<capability>.<action>"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardOp {
    pub op_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub arguments: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_condition: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<Condition>,
}

impl StandardOp {
    /// Split `op_name` into `(capability, action)`
    ///
    /// Returns `None` unless there is exactly one non-empty segment on
    /// each side of the first `.`.
    pub fn capability_action(&self) -> Option<(&str, &str)> {
        split_op_name(&self.op_name)
    }
}

pub fn split_op_name(op_name: &str) -> Option<(&str, &str)> {
    let (capability, action) = op_name.split_once('.')?;
    if capability.is_empty() || action.is_empty() || action.contains('.') {
        return None;
    }
    Some((capability, action))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub condition: Condition,

    pub then_branch: Vec<OperationNode>,

    #[serde(default)]
    pub else_branch: Vec<OperationNode>,
}

/// How a loop produces its sequence of items
///
/// Flattened into the loop node: exactly one of `count`, `items`,
/// `items_from` or `range` is present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationSpec {
    /// `0..n`
    Count(u64),
    /// Literal list
    Items(Vec<Value>),
    /// Reference path resolved at runtime to an array
    ItemsFrom(String),
    /// `start..end`, end exclusive
    Range { start: i64, end: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(flatten)]
    pub iteration: IterationSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_var: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,

    /// Checked before each iteration's body; true skips the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_if: Option<Condition>,

    /// Checked after each iteration's body; true ends the loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_if: Option<Condition>,

    pub body: Vec<OperationNode>,
}

impl LoopOp {
    pub fn item_var(&self) -> &str {
        self.item_var.as_deref().unwrap_or("item")
    }

    pub fn index_var(&self) -> &str {
        self.index_var.as_deref().unwrap_or("index")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Each branch is one node; declared order fixes result positions only
    pub branches: Vec<OperationNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryCatchFinallyOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub try_branch: Vec<OperationNode>,

    #[serde(default)]
    pub catch_branch: Vec<OperationNode>,

    #[serde(default)]
    pub finally_branch: Vec<OperationNode>,
}

/// A run/skip/branch condition: a JSON boolean or an expression string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Expression(String),
}
