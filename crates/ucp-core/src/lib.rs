//! UCP Core - packet model and pure execution kernel
//!
//! This crate provides everything about packet execution that does not
//! perform I/O:
//! - Packet, operation, result, receipt and template models
//! - Structural packet validation
//! - Canonical JSON and SHA-256 digests for packets and receipts
//! - Receipt building and tamper verification
//! - Token ledger and template cache economics
//! - Condition expressions and `{{ path }}` argument templating
//! - Repository contracts with in-memory implementations
//! - Error and logging facilities shared by the other crates

pub mod context;
pub mod digest;
pub mod economics;
pub mod errors;
pub mod expr;
pub mod ledger;
pub mod logging_facility;
pub mod model;
pub mod path;
pub mod receipt;
pub mod repository;
pub mod resolve;
pub mod rules;

#[doc(hidden)]
pub use ucp_core_types;

// Re-export commonly used types
pub use economics::CacheAnnotation;
pub use errors::{ExError, ExErrorKind, OperationError, Result, UcpError, ValidationError};
pub use ledger::{LedgerSnapshot, TokenLedger};
pub use model::{OperationNode, OperationResult, Packet, Receipt, Template};
pub use receipt::{build_receipt, verify_receipt, RunOutcome};
pub use repository::{InMemoryKvStore, InMemoryTemplateRepo, KvStore, TemplateRepository};
pub use rules::{validate, validate_body, ValidationOptions};
