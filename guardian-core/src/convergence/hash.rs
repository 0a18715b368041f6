//! SHA-256 hashing helpers for provenance, input, and audit-chain hashes.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Provenance hash over provider name, input hash, raw text, and timestamp,
/// computed before any score normalization.
pub fn provenance_hash(
    provider_name: &str,
    input_hash: &str,
    raw_text: &str,
    timestamp_rfc3339: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_name.as_bytes());
    hasher.update(b"\x1e");
    hasher.update(input_hash.as_bytes());
    hasher.update(b"\x1e");
    hasher.update(raw_text.as_bytes());
    hasher.update(b"\x1e");
    hasher.update(timestamp_rfc3339.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }

    #[test]
    fn provenance_hash_changes_with_any_component() {
        let base = provenance_hash("openai", "abc", "text", "2026-01-01T00:00:00Z");
        let diff_provider = provenance_hash("anthropic", "abc", "text", "2026-01-01T00:00:00Z");
        assert_ne!(base, diff_provider);
    }
}
