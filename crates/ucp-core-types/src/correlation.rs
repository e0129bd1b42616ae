//! Correlation types for run tracking and tracing
//!
//! Every packet execution gets a `RunId`; drivers receive a `RequestContext`
//! so that their own logs can be joined back to the run and packet that
//! invoked them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! correlation_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a new time-ordered id (UUIDv7)
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Wrap an existing id (e.g. read back from a stored receipt)
            pub fn from_string(s: String) -> Self {
                Self(s)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

correlation_id!(
    /// Identifier of a single packet execution
    RunId
);

correlation_id!(
    /// Trace identifier supplied by an outer caller
    TraceId
);

/// Context handed to capability drivers on every invocation
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub run_id: RunId,
    pub packet_id: String,
    /// Location of the invoking node, e.g. `operations[2].then_branch[0]`
    pub node_path: String,
    pub trace_id: Option<TraceId>,
}

impl RequestContext {
    pub fn new(run_id: RunId, packet_id: impl Into<String>, node_path: impl Into<String>) -> Self {
        Self {
            run_id,
            packet_id: packet_id.into(),
            node_path: node_path.into(),
            trace_id: None,
        }
    }

    /// Attach an outer trace id
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_generation() {
        let id1 = RunId::new();
        let id2 = RunId::new();

        assert_ne!(id1, id2);
        assert!(!id1.as_str().is_empty());
    }

    #[test]
    fn test_run_ids_are_time_ordered() {
        let earlier = RunId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = RunId::new();
        assert!(earlier.as_str() < later.as_str());
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = TraceId::new();
        assert_eq!(format!("{}", id), id.as_str());
    }

    #[test]
    fn test_request_context_carries_location() {
        let run_id = RunId::new();
        let ctx = RequestContext::new(run_id.clone(), "pkt-1", "operations[0]");
        assert_eq!(ctx.run_id, run_id);
        assert_eq!(ctx.packet_id, "pkt-1");
        assert_eq!(ctx.node_path, "operations[0]");
        assert!(ctx.trace_id.is_none());
    }

    #[test]
    fn test_request_context_with_trace_id() {
        let trace_id = TraceId::from_string("trace-abc".to_string());
        let ctx = RequestContext::new(RunId::new(), "pkt-1", "operations[0]")
            .with_trace_id(trace_id.clone());
        assert_eq!(ctx.trace_id, Some(trace_id));
    }

    #[test]
    fn test_serialization() {
        let id = RunId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
