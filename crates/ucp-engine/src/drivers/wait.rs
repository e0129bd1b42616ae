//! `wait` capability
//!
//! - `delay` sleeps for `ms` (default 1000) or `seconds`
//! - `until` polls a storage `key` every `interval_ms` (default 100) until
//!   it exists, or equals `equals` when given, failing after `timeout_ms`
//!   (default 30000)

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use ucp_core::KvStore;
use ucp_core_types::RequestContext;

use super::args::{optional_u64, required_str};
use super::{Driver, DriverError};

const ACTIONS: &[&str] = &["delay", "until"];
const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_UNTIL_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone)]
pub struct WaitDriver {
    max_delay_ms: u64,
    store: Option<Arc<dyn KvStore>>,
}

impl WaitDriver {
    pub fn new() -> Self {
        Self {
            max_delay_ms: 5 * 60 * 1000,
            store: None,
        }
    }

    /// Store `until` polls; without one `until` fails
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Refuse delays longer than `max_delay_ms`
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }
}

impl Default for WaitDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for WaitDriver {
    fn capability(&self) -> &str {
        "wait"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Value, DriverError> {
        match action {
            "delay" => self.delay(args).await,
            "until" => self.until(args, ctx).await,
            other => Err(DriverError::UnknownAction(other.to_string())),
        }
    }
}

impl WaitDriver {
    fn check_limit(&self, name: &str, ms: u64) -> Result<(), DriverError> {
        if ms > self.max_delay_ms {
            return Err(DriverError::invalid(format!(
                "{name} of {ms} ms exceeds the {} ms maximum",
                self.max_delay_ms
            )));
        }
        Ok(())
    }

    async fn delay(&self, args: &Map<String, Value>) -> Result<Value, DriverError> {
        let ms = match optional_u64(args, "ms")? {
            Some(ms) => ms,
            None => optional_u64(args, "seconds")?
                .map(|s| s.saturating_mul(1000))
                .unwrap_or(DEFAULT_DELAY_MS),
        };
        self.check_limit("delay", ms)?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({"ok": true, "waited": ms}))
    }

    async fn until(
        &self,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Value, DriverError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| DriverError::failed("wait.until has no storage to poll"))?;
        let key = required_str(args, "key")?;
        let expected = args.get("equals");
        let interval_ms = optional_u64(args, "interval_ms")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let timeout_ms = optional_u64(args, "timeout_ms")?.unwrap_or(DEFAULT_UNTIL_TIMEOUT_MS);
        if interval_ms == 0 {
            return Err(DriverError::invalid("'interval_ms' must be positive"));
        }
        self.check_limit("timeout", timeout_ms)?;

        tracing::debug!(node_path = %ctx.node_path, key, interval_ms, timeout_ms, "wait.until");
        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);
        let mut polls = 0u64;
        loop {
            polls += 1;
            let stored = store
                .get(key)
                .map_err(|e| DriverError::failed(format!("storage error: {}", e.message())))?;
            let satisfied = match (&stored, expected) {
                (Some(value), Some(expected)) => value == expected,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if satisfied {
                let waited = started.elapsed().as_millis() as u64;
                return Ok(json!({
                    "ok": true,
                    "key": key,
                    "value": stored,
                    "waited": waited,
                    "polls": polls,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::Timeout(timeout_ms));
            }
            let pause = Duration::from_millis(interval_ms).min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}
