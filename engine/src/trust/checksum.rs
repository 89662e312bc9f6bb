//! BLAKE3 content checksums

use sdk::ContentChecksum;

/// Compute the BLAKE3 digest of artifact bytes
pub fn digest(bytes: &[u8]) -> blake3::Hash {
    blake3::hash(bytes)
}

/// Compare a computed digest with a declared checksum
///
/// `blake3::Hash` equality runs in constant time.
pub fn matches(expected: &ContentChecksum, actual: &blake3::Hash) -> bool {
    blake3::Hash::from_bytes(*expected.as_bytes()) == *actual
}

/// Declared-checksum form of a digest
pub fn to_checksum(hash: &blake3::Hash) -> ContentChecksum {
    ContentChecksum::from_bytes(*hash.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_digest() {
        let checksum = to_checksum(&digest(b""));
        assert_eq!(
            checksum.to_string(),
            "blake3:af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_matches() {
        let declared = to_checksum(&digest(b"plugin bytes"));
        assert!(matches(&declared, &digest(b"plugin bytes")));
        assert!(!matches(&declared, &digest(b"plugin bytez")));
    }
}
