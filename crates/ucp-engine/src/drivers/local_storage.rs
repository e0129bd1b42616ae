//! `local_storage` capability over a `KvStore`

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use ucp_core::{ExError, KvStore};
use ucp_core_types::RequestContext;

use super::args::{required, required_str};
use super::{Driver, DriverError};

const ACTIONS: &[&str] = &["put", "get", "delete", "increment"];

pub struct LocalStorageDriver {
    store: Arc<dyn KvStore>,
}

impl LocalStorageDriver {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

fn store_error(err: ExError) -> DriverError {
    DriverError::failed(format!("storage error: {}", err.message()))
}

fn increment_by(args: &Map<String, Value>) -> Result<i64, DriverError> {
    match args.get("by") {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| DriverError::invalid("'by' must be an integer")),
        Some(_) => Err(DriverError::invalid("'by' must be an integer")),
    }
}

#[async_trait]
impl Driver for LocalStorageDriver {
    fn capability(&self) -> &str {
        "local_storage"
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
        let key = required_str(args, "key")?;
        tracing::debug!(node_path = %ctx.node_path, action, key, "local_storage");

        match action {
            "put" => {
                let value = required(args, "value")?.clone();
                self.store.put(key, value).map_err(store_error)?;
                Ok(json!({"ok": true, "key": key}))
            }
            "get" => {
                let stored = self.store.get(key).map_err(store_error)?;
                let found = stored.is_some();
                let value = stored
                    .or_else(|| args.get("default").cloned())
                    .unwrap_or(Value::Null);
                Ok(json!({"key": key, "value": value, "found": found}))
            }
            "delete" => {
                let deleted = self.store.delete(key).map_err(store_error)?;
                Ok(json!({"ok": true, "key": key, "deleted": deleted}))
            }
            "increment" => {
                let by = increment_by(args)?;
                let (previous, value) = self.store.increment(key, by).map_err(store_error)?;
                Ok(json!({"ok": true, "key": key, "value": value, "previous": previous}))
            }
            other => Err(DriverError::UnknownAction(other.to_string())),
        }
    }
}
