//! Core types shared across the UCP crates
//!
//! This crate provides the foundational types used by the error, logging
//! and execution layers:
//!
//! - **Correlation types**: RunId, TraceId, RequestContext
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical structured-log field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{RequestContext, RunId, TraceId};
pub use sensitive::Sensitive;
