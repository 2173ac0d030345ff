//! SHA-256 content hashing.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // Empty input has a well-known digest.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_stable_across_calls() {
        assert_eq!(sha256_hex(b"SELECT 1"), sha256_hex(b"SELECT 1"));
        assert_ne!(sha256_hex(b"SELECT 1"), sha256_hex(b"SELECT 2"));
    }
}
