// ABOUTME: SHA-256 certificate fingerprints over DER encodings
// ABOUTME: Fingerprints are lowercase hex without separators so lookups compare exactly
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of a DER-encoded certificate
#[must_use]
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Normalise a user-supplied fingerprint (`AB:CD:..` or mixed case) to storage form
#[must_use]
pub fn normalize(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let der = b"not really DER but bytes are bytes";
        assert_eq!(fingerprint(der), fingerprint(der));
        assert_eq!(fingerprint(der).len(), 64);
        assert_ne!(fingerprint(der), fingerprint(b"different bytes"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_normalize_colon_form() {
        assert_eq!(normalize("AB:cd:EF"), "abcdef");
    }
}
