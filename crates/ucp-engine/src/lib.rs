//! UCP Engine - packet execution runtime
//!
//! Runs validated packets against capability drivers:
//! - `interpreter`: recursive execution of the operation tree, producing a
//!   `RunOutcome` or a hashed `Receipt`
//! - `drivers`: the capability driver contract and the built-in drivers
//! - `accountant`: template registration, instantiation and cache-annotated
//!   runs
//! - `observer` / `abort`: host hooks for logs, progress, token usage and
//!   cooperative cancellation
//! - `config`: TOML + environment configuration

pub mod abort;
pub mod accountant;
pub mod config;
pub mod drivers;
pub mod interpreter;
pub mod observer;

pub use abort::AbortHandle;
pub use accountant::TemplateCacheAccountant;
pub use config::{ConfigError, EngineConfig};
pub use drivers::{CapabilityRegistry, Driver, DriverError};
pub use interpreter::{ExecutionLimits, Interpreter};
pub use observer::{CollectingObserver, ExecutionObserver, LogEntry, LogLevel, NoopObserver};
