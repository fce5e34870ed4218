//! Cryptographic primitives for the section engine
//!
//! Domain-separated SHA-256 for every commitment, a KDF deriving per-subsection
//! keys from channel keys and an AEAD sealing private subsections.

mod cipher;
mod kdf;

pub use cipher::{AesGcmCipher, ChannelKey, SubsectionCipher, SubsectionKeyMaterial, IV_LENGTH, KEY_LENGTH, TAG_LENGTH};
pub use kdf::{HkdfSha256, KeyDerivation};

use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};

/// A 32-byte digest
pub type Hash = [u8; 32];

/// The all-zero hash, used as tree padding and as the root of empty scopes
pub const ZERO_HASH: Hash = [0u8; 32];

/// Create a domain-separated secure hash using SHA-256
///
/// # Arguments
///
/// * `domain` - Domain prefix (e.g., "LEAF", "NODE")
/// * `data` - Data to hash
///
/// # Returns
///
/// A 32-byte secure hash with domain separation
pub fn secure_hash(domain: &str, data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();

    hasher.update(domain.as_bytes());

    // Domain length byte keeps variable-length domains unambiguous
    hasher.update([domain.len() as u8]);

    hasher.update(data);

    hasher.finalize().into()
}

/// Create a domain-separated secure hash of multiple inputs
///
/// Every element is prefixed with its 4-byte big-endian length, so no two
/// different part lists hash the same input.
pub fn secure_hash_multiple(domain: &str, data: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();

    hasher.update(domain.as_bytes());
    hasher.update([domain.len() as u8]);
    hasher.update([data.len() as u8]);

    for element in data {
        hasher.update((element.len() as u32).to_be_bytes());
        hasher.update(element);
    }

    hasher.finalize().into()
}

/// Verify a hash in constant time
pub fn verify_hash(expected: &Hash, actual: &Hash) -> bool {
    constant_time_eq(expected, actual)
}

/// Draw a fresh random 32-byte value (peppers, test keys)
pub fn random_hash() -> Hash {
    use rand::RngCore;

    let mut out = ZERO_HASH;
    rand::thread_rng().fill_bytes(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_hash() {
        let data = b"test data";
        let hash = secure_hash("TEST", data);

        assert_eq!(hash, secure_hash("TEST", data));
        assert_ne!(hash, secure_hash("DIFFERENT", data));
        assert_ne!(hash, secure_hash("TEST", b"different data"));
    }

    #[test]
    fn test_secure_hash_multiple() {
        let data1 = b"data1";
        let data2 = b"data2";

        let hash = secure_hash_multiple("TEST", &[data1, data2]);

        assert_eq!(hash, secure_hash_multiple("TEST", &[data1, data2]));
        assert_ne!(hash, secure_hash_multiple("DIFFERENT", &[data1, data2]));
        assert_ne!(hash, secure_hash_multiple("TEST", &[data2, data1]));

        // Concatenation should not collide
        let mut concatenated = Vec::new();
        concatenated.extend_from_slice(data1);
        concatenated.extend_from_slice(data2);
        assert_ne!(hash, secure_hash("TEST", &concatenated));

        // Moving a byte across the part boundary changes the hash
        assert_ne!(
            secure_hash_multiple("TEST", &[b"ab", b"c"]),
            secure_hash_multiple("TEST", &[b"a", b"bc"])
        );
    }

    #[test]
    fn test_verify_hash() {
        let hash = secure_hash("TEST", b"test data");

        assert!(verify_hash(&hash, &hash));
        assert!(!verify_hash(&hash, &secure_hash("TEST", b"different data")));
    }

    #[test]
    fn test_random_hash_is_fresh() {
        assert_ne!(random_hash(), random_hash());
    }
}
