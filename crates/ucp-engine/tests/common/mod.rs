use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ucp_core::{validate, Packet, ValidationOptions};
use ucp_core_types::RequestContext;
use ucp_engine::drivers::TransformDriver;
use ucp_engine::{CapabilityRegistry, Driver, DriverError, Interpreter};

/// Actions every `ScriptedDriver` accepts
///
/// - `fail` always errors with the `message` argument
/// - `echo` returns its arguments under `args`
/// - anything else returns the scripted response, or `{"ok": true}`
const SCRIPTED_ACTIONS: &[&str] = &["get", "post", "invoke", "analyze", "show", "echo", "fail"];

/// Driver with canned responses that records every call it receives
#[allow(dead_code)]
pub struct ScriptedDriver {
    capability: &'static str,
    metered: bool,
    latency: Option<Duration>,
    responses: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

#[allow(dead_code)]
impl ScriptedDriver {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            metered: false,
            latency: None,
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Metered stub: every call reports 10 input and 5 output tokens
    pub fn metered(capability: &'static str) -> Self {
        Self {
            metered: true,
            ..Self::new(capability)
        }
    }

    /// Every call sleeps this long before answering
    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.latency = Some(Duration::from_millis(ms));
        self
    }

    pub fn respond(self, action: &str, output: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(action.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn capability(&self) -> &str {
        self.capability
    }

    fn actions(&self) -> &[&'static str] {
        SCRIPTED_ACTIONS
    }

    fn meters_tokens(&self) -> bool {
        self.metered
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<Value, DriverError> {
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), args.clone()));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut output = match action {
            "fail" => {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("scripted failure");
                return Err(DriverError::failed(message));
            }
            "echo" => json!({ "args": Value::Object(args.clone()) }),
            other => self
                .responses
                .lock()
                .unwrap()
                .get(other)
                .cloned()
                .unwrap_or_else(|| json!({ "ok": true })),
        };

        if self.metered {
            if let Value::Object(map) = &mut output {
                map.entry("tokens")
                    .or_insert_with(|| json!({"input": 10, "output": 5}));
            }
        }
        Ok(output)
    }
}

/// A valid packet document over `capabilities`
#[allow(dead_code)]
pub fn packet_json(id: &str, capabilities: &[&str], operations: Value) -> Value {
    json!({
        "protocol_version": "0.1",
        "id": id,
        "ttl_seconds": 3600,
        "required_capabilities": capabilities,
        "declared_permissions": [],
        "metadata": {"name": "engine test", "owner": "tests"},
        "operations": operations
    })
}

#[allow(dead_code)]
pub fn packet(id: &str, capabilities: &[&str], operations: Value) -> Packet {
    validate(
        &packet_json(id, capabilities, operations),
        &ValidationOptions::default(),
    )
    .unwrap()
}

/// Interpreter over the transform driver plus the given scripted drivers
#[allow(dead_code)]
pub fn interpreter(drivers: &[Arc<ScriptedDriver>]) -> Interpreter {
    let mut registry = CapabilityRegistry::new().with(Arc::new(TransformDriver::new()));
    for driver in drivers {
        registry.register(driver.clone());
    }
    Interpreter::new(Arc::new(registry))
}
