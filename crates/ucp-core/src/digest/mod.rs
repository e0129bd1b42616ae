//! Integrity digests for packets and receipts.
//!
//! ## Digest Types
//!
//! - **Packet hash**: SHA-256 of the canonical packet, excluding `signature`
//! - **Receipt hash**: SHA-256 of the canonical receipt, excluding
//!   `receipt_hash` itself
//!
//! ## Determinism Guarantees
//!
//! - Field order and whitespace never affect a digest (canonical JSON)
//! - Timestamps are only covered where they are part of the hashed document
//!   (receipts), never for packets

pub mod canonical;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::model::Packet;

pub use canonical::to_canonical_string;

/// Fields excluded from the packet hash
const PACKET_HASH_EXCLUDED: &[&str] = &["signature"];

/// Field excluded from the receipt hash
pub const RECEIPT_HASH_FIELD: &str = "receipt_hash";

/// Compute the packet hash.
///
/// ## Arguments
///
/// - `packet`: Validated packet
///
/// ## Returns
///
/// Hex-encoded SHA256 digest (64 characters)
///
/// ## Errors
///
/// Returns `UcpError::Serialization` if the packet cannot be encoded.
pub fn packet_hash(packet: &Packet) -> Result<String> {
    let value = serde_json::to_value(packet)?;
    Ok(packet_value_hash(&value))
}

/// Compute the packet hash of an already-encoded packet document
pub fn packet_value_hash(packet: &Value) -> String {
    let mut value = packet.clone();
    if let Value::Object(map) = &mut value {
        for field in PACKET_HASH_EXCLUDED {
            map.remove(*field);
        }
    }
    hash_value(&value)
}

/// Compute the receipt hash of an encoded receipt document.
///
/// The `receipt_hash` field, if present, is ignored, so the stored hash of a
/// receipt can be recomputed from the receipt itself.
pub fn receipt_value_hash(receipt: &Value) -> String {
    let mut value = receipt.clone();
    if let Value::Object(map) = &mut value {
        map.remove(RECEIPT_HASH_FIELD);
    }
    hash_value(&value)
}

/// SHA-256 of the canonical encoding of `value`
pub fn hash_value(value: &Value) -> String {
    hash_string(&to_canonical_string(value))
}

/// Hash a string using SHA256.
///
/// Returns hex-encoded digest (64 characters).
pub fn hash_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}
