//! Capability drivers
//!
//! A driver executes every action of one capability family
//! (`"http"`, `"transform"`, ...). The interpreter resolves `op_name` to a
//! `(capability, action)` pair, finds the driver in a `CapabilityRegistry`
//! and calls `invoke` with the already-templated arguments.
//!
//! ## Logging
//!
//! The interpreter logs every node's start/end. Drivers only emit
//! `tracing::debug!` for their own details.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use ucp_core::KvStore;
use ucp_core_types::RequestContext;

use crate::config::EngineConfig;

pub mod args;
pub mod http;
pub mod llm;
pub mod local_storage;
pub mod notification;
pub mod transform;
pub mod wait;

pub use http::HttpDriver;
pub use llm::{LlmBackend, LlmCompletion, LlmDriver, LlmRequest, OpenAiCompatibleBackend};
pub use local_storage::LocalStorageDriver;
pub use notification::{Notification, NotificationSink, NotificationDriver, TracingNotificationSink};
pub use transform::TransformDriver;
pub use wait::WaitDriver;

/// Failure reported by a driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

impl DriverError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        DriverError::InvalidArguments(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        DriverError::Failed(reason.into())
    }
}

/// Tokens consumed by one metered call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    /// Read the `tokens: {input, output}` object a metered driver returns
    pub fn from_output(output: &Value) -> Option<Self> {
        let tokens = output.get("tokens")?;
        Some(Self {
            input: tokens.get("input").and_then(Value::as_u64).unwrap_or(0),
            output: tokens.get("output").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Executor for one capability family
#[async_trait]
pub trait Driver: Send + Sync {
    /// Capability name as it appears before the dot in `op_name`
    fn capability(&self) -> &str;

    /// Every action this driver accepts
    fn actions(&self) -> &[&'static str];

    /// Metered drivers report `tokens: {input, output}` in their output;
    /// the interpreter feeds those into the run's token ledger and serves
    /// repeated identical calls from a per-run cache.
    fn meters_tokens(&self) -> bool {
        false
    }

    fn supports(&self, action: &str) -> bool {
        self.actions().contains(&action)
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Value, DriverError>;
}

/// Drivers available to the interpreter, keyed by capability
///
/// Registering a driver for a capability that already has one replaces it.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(driver.capability().to_string(), driver);
        self
    }

    pub fn with(mut self, driver: Arc<dyn Driver>) -> Self {
        self.register(driver);
        self
    }

    pub fn get(&self, capability: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(capability).cloned()
    }

    /// Registry holding every built-in driver
    ///
    /// `llm` overrides the configured OpenAI-compatible backend; notifications
    /// go to `tracing` unless `sink` is given.
    ///
    /// ## Errors
    ///
    /// Returns `DriverError::Failed` if an HTTP client cannot be built.
    pub fn builtin(
        config: &EngineConfig,
        store: Arc<dyn KvStore>,
        sink: Option<Arc<dyn NotificationSink>>,
        llm: Option<Arc<dyn LlmBackend>>,
    ) -> Result<Self, DriverError> {
        let llm = match llm {
            Some(backend) => backend,
            None => Arc::new(OpenAiCompatibleBackend::new(
                &config.llm,
                config.llm_api_key(),
            )?),
        };
        let notification = match sink {
            Some(sink) => NotificationDriver::new(sink),
            None => NotificationDriver::default(),
        };

        Ok(Self::new()
            .with(Arc::new(HttpDriver::new(&config.http)?))
            .with(Arc::new(LlmDriver::new(llm)))
            .with(Arc::new(LocalStorageDriver::new(store.clone())))
            .with(Arc::new(notification))
            .with(Arc::new(TransformDriver::new()))
            .with(Arc::new(WaitDriver::new().with_store(store))))
    }

    /// Registered capability names, sorted
    pub fn capabilities(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_lookup_and_replace() {
        let registry = CapabilityRegistry::new()
            .with(Arc::new(TransformDriver::new()))
            .with(Arc::new(WaitDriver::new()));
        assert_eq!(registry.capabilities(), vec!["transform", "wait"]);
        assert!(registry.get("transform").is_some());
        assert!(registry.get("http").is_none());

        let mut registry = registry;
        registry.register(Arc::new(WaitDriver::new()));
        assert_eq!(registry.capabilities().len(), 2);
    }

    #[test]
    fn test_builtin_registry_covers_all_capabilities() {
        let registry = CapabilityRegistry::builtin(
            &EngineConfig::default(),
            Arc::new(ucp_core::InMemoryKvStore::new()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            registry.capabilities(),
            vec!["http", "llm", "local_storage", "notification", "transform", "wait"]
        );
    }

    #[test]
    fn test_token_usage_from_output() {
        let usage = TokenUsage::from_output(&json!({"tokens": {"input": 12, "output": 30}}));
        assert_eq!(usage, Some(TokenUsage { input: 12, output: 30 }));
        assert_eq!(usage.map(|u| u.total()), Some(42));
        assert!(TokenUsage::from_output(&json!({"response": "x"})).is_none());
    }

    #[test]
    fn test_supports() {
        let driver = TransformDriver::new();
        assert!(driver.supports("map"));
        assert!(!driver.supports("explode"));
    }
}
