//! C1 — content hashing and injection fingerprint derivation.
//!
//! Content hashes use SHA-256 (a fixed cryptographic digest, per §4.1),
//! rendered as lowercase hex. The teacher's own `xxhash-rust` dependency is
//! a fast non-cryptographic 64-bit hash used there for a cache-invalidation
//! key, not a stable cross-process fingerprint contract — `sha2` + `hex`
//! (as used for content hashing in `ascarter-devspace` and
//! `mark-ik-graphshell`) is the right fit here.
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use sha2::{Digest, Sha256};

use crate::error::Error;

/// Prefix mixed into every fingerprint derivation, versioning the scheme.
const FINGERPRINT_DOMAIN: &str = "vmm-v1";

/// Computes the lowercase-hex SHA-256 digest of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Computes the lowercase-hex SHA-256 digest of a file's contents.
pub fn hash_file(path: &Path) -> Result<String, Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = io::Read::read(&mut file, &mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the lowercase-hex SHA-256 digest of an already-open reader.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derives the injection fingerprint from the loader's content hash and the
/// ordered list of enabled mod ids, per §4.1:
/// `sha256("vmm-v1" ‖ loader_content_hash ‖ ordered_enabled_mod_ids)`.
///
/// Two installations sharing the same enabled set and loader content thus
/// share a fingerprint, and regenerating from identical inputs always
/// yields the same value (§8 invariant 2/3).
pub fn derive_fingerprint(loader_content_hash: &str, ordered_enabled_mod_ids: &[String]) -> String {
    let mut canonical = String::with_capacity(
        FINGERPRINT_DOMAIN.len()
            + loader_content_hash.len()
            + ordered_enabled_mod_ids.iter().map(String::len).sum::<usize>()
            + ordered_enabled_mod_ids.len(),
    );
    canonical.push_str(FINGERPRINT_DOMAIN);
    canonical.push_str(loader_content_hash);
    for id in ordered_enabled_mod_ids {
        canonical.push_str(id);
    }
    hash_bytes(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn test_hash_bytes_is_lowercase_hex_sha256_length() {
        let digest = hash_bytes(b"anything");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_derive_fingerprint_matches_manual_concatenation() {
        let loader_hash = hash_bytes(b"loader contents");
        let ids = vec!["hello.js".to_string()];

        let expected = hash_bytes(format!("vmm-v1{loader_hash}hello.js").as_bytes());
        assert_eq!(derive_fingerprint(&loader_hash, &ids), expected);
    }

    #[test]
    fn test_derive_fingerprint_is_order_sensitive() {
        let loader_hash = hash_bytes(b"loader contents");
        let ids_a = vec!["a.js".to_string(), "b.js".to_string()];
        let ids_b = vec!["b.js".to_string(), "a.js".to_string()];

        assert_ne!(
            derive_fingerprint(&loader_hash, &ids_a),
            derive_fingerprint(&loader_hash, &ids_b)
        );
    }

    #[test]
    fn test_derive_fingerprint_same_inputs_same_output() {
        let loader_hash = hash_bytes(b"loader contents");
        let ids = vec!["a.js".to_string(), "b.js".to_string()];

        assert_eq!(
            derive_fingerprint(&loader_hash, &ids),
            derive_fingerprint(&loader_hash, &ids)
        );
    }
}
