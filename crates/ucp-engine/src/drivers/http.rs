//! `http` capability
//!
//! Arguments: `url`, optional `headers` (object of strings), `json` (sent as
//! a JSON body) or `body` (sent as text), `timeout` in milliseconds.
//! Output: `{ status, ok, response }` where `response` is the decoded JSON
//! body when it parses, else the raw text. Non-2xx responses are returned
//! with `ok = false`; only transport failures are driver errors.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::time::Duration;

use ucp_core_types::RequestContext;

use super::args::{optional_str, optional_u64, required_str};
use super::{Driver, DriverError};
use crate::config::HttpConfig;

const ACTIONS: &[&str] = &["get", "post", "put", "delete"];

pub struct HttpDriver {
    client: Client,
    default_timeout_ms: u64,
}

impl HttpDriver {
    /// ## Errors
    ///
    /// Returns `DriverError::Failed` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, DriverError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DriverError::failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            default_timeout_ms: config.timeout_ms,
        })
    }

    fn method(action: &str) -> Result<Method, DriverError> {
        match action {
            "get" => Ok(Method::GET),
            "post" => Ok(Method::POST),
            "put" => Ok(Method::PUT),
            "delete" => Ok(Method::DELETE),
            other => Err(DriverError::UnknownAction(other.to_string())),
        }
    }
}

#[async_trait]
impl Driver for HttpDriver {
    fn capability(&self) -> &str {
        "http"
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
        let method = Self::method(action)?;
        let url = required_str(args, "url")?;
        let timeout_ms = optional_u64(args, "timeout")?.unwrap_or(self.default_timeout_ms);

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(Duration::from_millis(timeout_ms));

        if let Some(headers) = args.get("headers") {
            let headers = headers
                .as_object()
                .ok_or_else(|| DriverError::invalid("'headers' must be an object"))?;
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }

        if let Some(body) = args.get("json").filter(|v| !v.is_null()) {
            request = request.json(body);
        } else if let Some(body) = optional_str(args, "body")? {
            request = request.body(body.to_string());
        }

        tracing::debug!(
            packet_id = %ctx.packet_id,
            node_path = %ctx.node_path,
            method = %method,
            url = %url,
            "http request"
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout(timeout_ms)
            } else {
                DriverError::failed(format!("{method} {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout(timeout_ms)
            } else {
                DriverError::failed(format!("failed to read response body: {e}"))
            }
        })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "response": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucp_core_types::RunId;

    fn ctx() -> RequestContext {
        RequestContext::new(RunId::new(), "pkt", "operations[0]")
    }

    #[tokio::test]
    async fn test_unknown_method_rejected() {
        let driver = HttpDriver::new(&HttpConfig::default()).unwrap();
        let mut args = Map::new();
        args.insert("url".to_string(), json!("http://127.0.0.1:9"));
        let err = driver.invoke("patch", &args, &ctx()).await.unwrap_err();
        assert_eq!(err, DriverError::UnknownAction("patch".to_string()));
    }

    #[tokio::test]
    async fn test_missing_url_is_invalid() {
        let driver = HttpDriver::new(&HttpConfig::default()).unwrap();
        let err = driver.invoke("get", &Map::new(), &ctx()).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_connection_failure_is_driver_error() {
        let driver = HttpDriver::new(&HttpConfig::default()).unwrap();
        let mut args = Map::new();
        // Port 9 (discard) is closed on test machines
        args.insert("url".to_string(), json!("http://127.0.0.1:9/"));
        args.insert("timeout".to_string(), json!(2000));
        let err = driver.invoke("get", &args, &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Failed(_) | DriverError::Timeout(_)
        ));
    }
}
