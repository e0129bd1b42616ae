//! Run observers
//!
//! Observers are called inline by the interpreter, in emission order. They
//! must not block for long: a slow observer delays the run.

use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

use ucp_core::LedgerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of the run's own log, as shown to an operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Callbacks fired while a packet runs. Every method defaults to a no-op.
pub trait ExecutionObserver: Send + Sync {
    fn on_log(&self, _entry: &LogEntry) {}

    /// `completed` never exceeds `total`
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Fired after every token-metered call, cached or not
    fn on_token_update(&self, _snapshot: &LedgerSnapshot) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Observer that keeps everything it is told, for the CLI's run log and for
/// tests
#[derive(Debug, Default)]
pub struct CollectingObserver {
    logs: Mutex<Vec<LogEntry>>,
    progress: Mutex<Vec<(usize, usize)>>,
    token_updates: Mutex<Vec<LedgerSnapshot>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn progress(&self) -> Vec<(usize, usize)> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn token_updates(&self) -> Vec<LedgerSnapshot> {
        self.token_updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ExecutionObserver for CollectingObserver {
    fn on_log(&self, entry: &LogEntry) {
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((completed, total));
    }

    fn on_token_update(&self, snapshot: &LedgerSnapshot) {
        self.token_updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_observer_records_in_order() {
        let observer = CollectingObserver::new();
        observer.on_progress(1, 3);
        observer.on_progress(2, 3);
        observer.on_log(&LogEntry {
            timestamp_ms: 1,
            level: LogLevel::Info,
            message: "started".to_string(),
            node_path: None,
            data: None,
        });
        assert_eq!(observer.progress(), vec![(1, 3), (2, 3)]);
        assert_eq!(observer.logs()[0].message, "started");
        assert!(observer.token_updates().is_empty());
    }

    #[test]
    fn test_log_entry_shape() {
        let entry = LogEntry {
            timestamp_ms: 5,
            level: LogLevel::Warn,
            message: "skipped".to_string(),
            node_path: Some("operations[0]".to_string()),
            data: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["level"], "warn");
        assert!(value.get("data").is_none());
    }
}
