use serde::{Deserialize, Serialize};

use super::operation::OperationNode;

/// Wire protocol version stamped on packets created by this crate
pub const PROTOCOL_VERSION: &str = "0.1";

/// Capability families a packet may declare in `required_capabilities`
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "http",
    "local_storage",
    "notification",
    "transform",
    "llm",
    "wait",
];

/// Descriptive packet metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub name: String,
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form origin marker (authoring tool, template, import source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

/// Packet - a declarative tree of operations submitted for execution
///
/// Packets are produced by `rules::validation::validate` (never deserialized
/// directly from untrusted input) so that every instance is structurally
/// well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub protocol_version: String,

    /// Unique identifier, assigned once at creation
    pub id: String,

    pub ttl_seconds: u64,

    /// Issuance time (epoch milliseconds); TTL is only enforceable when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<u64>,

    pub required_capabilities: Vec<String>,

    pub declared_permissions: Vec<String>,

    pub metadata: PacketMetadata,

    /// Non-empty ordered forest of operation nodes
    pub operations: Vec<OperationNode>,

    /// Detached signature; not covered by the packet hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Back-reference to the template this packet was instantiated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

impl Packet {
    /// Whether `capability` appears in `required_capabilities`
    pub fn declares(&self, capability: &str) -> bool {
        self.required_capabilities.iter().any(|c| c == capability)
    }

    /// Epoch millisecond after which the packet is expired, if known
    pub fn expires_at(&self) -> Option<u64> {
        self.issued_at
            .map(|issued| issued.saturating_add(self.ttl_seconds.saturating_mul(1000)))
    }

    /// Check whether the packet's TTL has elapsed at `now_ms`
    ///
    /// Packets without `issued_at` never expire.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at().is_some_and(|expiry| expiry < now_ms)
    }

    /// Strip identity fields, leaving the reusable body
    pub fn body(&self) -> PacketBody {
        PacketBody {
            protocol_version: self.protocol_version.clone(),
            ttl_seconds: self.ttl_seconds,
            required_capabilities: self.required_capabilities.clone(),
            declared_permissions: self.declared_permissions.clone(),
            metadata: self.metadata.clone(),
            operations: self.operations.clone(),
        }
    }
}

/// Packet content minus identity (`id`, `issued_at`, `signature`, `template_id`)
///
/// Templates store a body; `instantiate` turns it back into a `Packet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketBody {
    pub protocol_version: String,
    pub ttl_seconds: u64,
    pub required_capabilities: Vec<String>,
    pub declared_permissions: Vec<String>,
    pub metadata: PacketMetadata,
    pub operations: Vec<OperationNode>,
}

impl PacketBody {
    /// Materialize a packet with fresh identity
    pub fn into_packet(
        self,
        id: String,
        issued_at: Option<u64>,
        template_id: Option<String>,
    ) -> Packet {
        Packet {
            protocol_version: self.protocol_version,
            id,
            ttl_seconds: self.ttl_seconds,
            issued_at,
            required_capabilities: self.required_capabilities,
            declared_permissions: self.declared_permissions,
            metadata: self.metadata,
            operations: self.operations,
            signature: None,
            template_id,
        }
    }
}
