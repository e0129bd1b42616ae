//! Checksums for migration SQL
//!
//! Line endings are normalized first, so the same migration checked out
//! with CRLF endings keeps its recorded checksum.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of `sql` with `\r\n` folded to `\n`
pub fn compute_checksum(sql: &str) -> String {
    let normalized = sql.replace("\r\n", "\n");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_hex_sha256() {
        let checksum = compute_checksum("SELECT 1");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum("SELECT 1"));
    }

    #[test]
    fn test_checksum_ignores_line_endings() {
        assert_eq!(
            compute_checksum("CREATE TABLE t (a);\r\nSELECT 1;\r\n"),
            compute_checksum("CREATE TABLE t (a);\nSELECT 1;\n")
        );
        assert_ne!(compute_checksum("SELECT 1"), compute_checksum("SELECT 2"));
    }
}
