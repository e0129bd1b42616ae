//! `notification` capability
//!
//! Delivery is pluggable through `NotificationSink`; the default sink just
//! writes the notification to the log.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use ucp_core_types::RequestContext;

use super::args::{optional_str, required_str};
use super::{Driver, DriverError};

const ACTIONS: &[&str] = &["show"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: Option<String>,
    pub message: String,
    /// Presentation hint, e.g. `toast` or `banner`
    pub method: String,
}

pub trait NotificationSink: Send + Sync {
    /// ## Errors
    ///
    /// Returns a description of why delivery failed.
    fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn deliver(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            title = notification.title.as_deref().unwrap_or(""),
            method = %notification.method,
            "notification: {}",
            notification.message
        );
        Ok(())
    }
}

pub struct NotificationDriver {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDriver {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

impl Default for NotificationDriver {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotificationSink))
    }
}

#[async_trait]
impl Driver for NotificationDriver {
    fn capability(&self) -> &str {
        "notification"
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
        if action != "show" {
            return Err(DriverError::UnknownAction(action.to_string()));
        }
        let notification = Notification {
            title: optional_str(args, "title")?.map(str::to_string),
            message: required_str(args, "message")?.to_string(),
            method: optional_str(args, "method")?.unwrap_or("toast").to_string(),
        };
        tracing::debug!(node_path = %ctx.node_path, "delivering notification");
        self.sink
            .deliver(&notification)
            .map_err(|reason| DriverError::failed(format!("notification not delivered: {reason}")))?;
        Ok(json!({"shown": true, "method": notification.method}))
    }
}
