//! Content digests for hash-chain and payload checks.
//!
//! Signatures and canonical encoding are handled by `rust-tuf`; see
//! [`crate::metadata::parse_envelope`].

use hex::encode as hex_encode;
use sha2::{Digest, Sha256, Sha512};

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(hasher.finalize())
}

/// Computes a lowercase hex digest, or `None` for algorithms the client does not implement.
pub fn digest_hex(algorithm: &str, bytes: &[u8]) -> Option<String> {
    match algorithm.to_ascii_lowercase().as_str() {
        "sha256" => Some(sha256_hex(bytes)),
        "sha512" => {
            let mut hasher = Sha512::new();
            hasher.update(bytes);
            Some(hex_encode(hasher.finalize()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest_hex("SHA256", b"abc"), Some(sha256_hex(b"abc")));
        assert_eq!(digest_hex("md5", b"abc"), None);
    }

    #[test]
    fn sha512_matches_known_vector() {
        assert_eq!(
            digest_hex("sha512", b"abc").unwrap(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }
}
