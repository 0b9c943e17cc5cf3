//! SHA-256 digests for stored checkpoint payloads.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Whether `bytes` hash to `expected` (case-insensitive hex).
pub fn verify_sha256(bytes: &[u8], expected: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        // SHA-256 of empty input
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_is_lowercase_hex() {
        let hash = sha256_hex(b"checkpoint");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_verify_sha256() {
        let hash = sha256_hex(b"payload");
        assert!(verify_sha256(b"payload", &hash));
        assert!(verify_sha256(b"payload", &hash.to_uppercase()));
        assert!(!verify_sha256(b"payload!", &hash));
    }
}
