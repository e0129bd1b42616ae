use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::packet::PacketBody;

pub const DEFAULT_BASELINE_PROMPT_TOKENS: u64 = 500;
pub const DEFAULT_BASELINE_COMPLETION_TOKENS: u64 = 200;

/// Template - a reusable packet body with its compilation baseline
///
/// The baseline is the estimated token cost of deriving an equivalent packet
/// through language-model compilation; runs of packets instantiated from a
/// template are credited with avoiding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub intent_description: String,
    pub packet_body: PacketBody,
    pub baseline_prompt_tokens: u64,
    pub baseline_completion_tokens: u64,

    /// Number of packets instantiated from this template
    pub reuse_count: u64,

    /// Number of completed runs of instantiated packets
    #[serde(default)]
    pub run_count: u64,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Template {
    /// Create a fresh template from an already-validated body
    pub fn new(id: String, registration: TemplateRegistration, packet_body: PacketBody) -> Self {
        Self {
            id,
            name: registration.name,
            intent_description: registration.intent_description,
            packet_body,
            baseline_prompt_tokens: registration.baseline_prompt_tokens,
            baseline_completion_tokens: registration.baseline_completion_tokens,
            reuse_count: 0,
            run_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
            category: registration.category,
            tags: registration.tags,
        }
    }
}

fn default_baseline_prompt_tokens() -> u64 {
    DEFAULT_BASELINE_PROMPT_TOKENS
}

fn default_baseline_completion_tokens() -> u64 {
    DEFAULT_BASELINE_COMPLETION_TOKENS
}

/// Registration request; `packet_body` is raw and validated on registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRegistration {
    pub name: String,
    #[serde(default)]
    pub intent_description: String,
    pub packet_body: Value,
    #[serde(default = "default_baseline_prompt_tokens")]
    pub baseline_prompt_tokens: u64,
    #[serde(default = "default_baseline_completion_tokens")]
    pub baseline_completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
