//! Key derivation
//!
//! HKDF (RFC 5869) over HMAC-SHA256. The engine only relies on the
//! `derive(key, info, bit_length)` shape, so callers may plug their own KDF.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;

const HASH_LENGTH: usize = 32;

/// Salt used by the extract step
const EXTRACT_SALT: &[u8] = b"CARMENTIS_SUBSECTION_KDF";

/// A key derivation function with a fixed input/output shape
pub trait KeyDerivation: Send + Sync {
    /// Derive `bit_length` bits of key material from `key` bound to `info`
    fn derive(&self, key: &[u8], info: &[u8], bit_length: usize) -> Result<Vec<u8>, CryptoError>;
}

/// HKDF-SHA256
#[derive(Debug, Clone, Copy, Default)]
pub struct HkdfSha256;

fn extract_and_expand(salt: &[u8], key: &[u8], info: &[u8], bit_length: usize) -> Result<Vec<u8>, CryptoError> {
    if bit_length == 0 || bit_length % 8 != 0 || bit_length / 8 > 255 * HASH_LENGTH {
        return Err(CryptoError::OutputTooLong(bit_length));
    }

    let hk = Hkdf::<Sha256>::new(Some(salt), key);
    let mut okm = vec![0u8; bit_length / 8];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::OutputTooLong(bit_length))?;

    Ok(okm)
}

impl KeyDerivation for HkdfSha256 {
    fn derive(&self, key: &[u8], info: &[u8], bit_length: usize) -> Result<Vec<u8>, CryptoError> {
        extract_and_expand(EXTRACT_SALT, key, info, bit_length)
    }
}
