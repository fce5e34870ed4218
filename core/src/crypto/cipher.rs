//! AES-256-GCM sealing of private subsections
//!
//! Each subsection gets its own key and IV, derived from the channel key and
//! the subsection's position in the chain. An IV is therefore never reused
//! with the same derived key.
//!
//! ```text
//! info = "SUBSECTION" ‖ height (u64 BE) ‖ section index (u32 BE) ‖ subsection id (u32 BE)
//! KDF(channel key, info, 352 bits) = key (32 bytes) ‖ iv (12 bytes)
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::KeyDerivation;
use crate::error::CryptoError;

/// Length of a channel or subsection key in bytes
pub const KEY_LENGTH: usize = 32;

/// Length of an AES-GCM IV in bytes
pub const IV_LENGTH: usize = 12;

/// Length of the AES-GCM authentication tag in bytes
pub const TAG_LENGTH: usize = 16;

const SUBSECTION_INFO: &[u8] = b"SUBSECTION";

/// Symmetric key backing one channel
///
/// Key material is zeroed from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct ChannelKey {
    key: [u8; KEY_LENGTH],
}

impl ChannelKey {
    /// Restore a channel key from its raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// Restore a channel key from a slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(bytes.len()))?;
        Ok(Self { key })
    }

    /// Generate a random channel key
    pub fn generate() -> Self {
        Self { key: super::random_hash() }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChannelKey([REDACTED])")
    }
}

/// Key and IV for exactly one subsection
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SubsectionKeyMaterial {
    key: [u8; KEY_LENGTH],
    iv: [u8; IV_LENGTH],
}

impl SubsectionKeyMaterial {
    /// Derive the material for one subsection
    pub fn derive(
        channel_key: &ChannelKey,
        kdf: &dyn KeyDerivation,
        height: u64,
        section_index: u32,
        subsection_id: u32,
    ) -> Result<Self, CryptoError> {
        let mut info = Vec::with_capacity(SUBSECTION_INFO.len() + 16);
        info.extend_from_slice(SUBSECTION_INFO);
        info.extend_from_slice(&height.to_be_bytes());
        info.extend_from_slice(&section_index.to_be_bytes());
        info.extend_from_slice(&subsection_id.to_be_bytes());

        let mut output = kdf.derive(channel_key.as_bytes(), &info, (KEY_LENGTH + IV_LENGTH) * 8)?;
        if output.len() != KEY_LENGTH + IV_LENGTH {
            let length = output.len();
            output.zeroize();
            return Err(CryptoError::InvalidLength(length));
        }

        let mut material = Self { key: [0u8; KEY_LENGTH], iv: [0u8; IV_LENGTH] };
        material.key.copy_from_slice(&output[..KEY_LENGTH]);
        material.iv.copy_from_slice(&output[KEY_LENGTH..]);
        output.zeroize();

        Ok(material)
    }

    /// Derived key
    pub fn key(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derived IV
    pub fn iv(&self) -> &[u8; IV_LENGTH] {
        &self.iv
    }
}

/// An AEAD with a fixed `(key, data, iv)` shape
pub trait SubsectionCipher: Send + Sync {
    /// Encrypt and authenticate `plaintext`
    fn encrypt(&self, key: &[u8], plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticate and decrypt `ciphertext`
    fn decrypt(&self, key: &[u8], ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    fn cipher(key: &[u8], iv: &[u8]) -> Result<Aes256Gcm, CryptoError> {
        if iv.len() != IV_LENGTH {
            return Err(CryptoError::InvalidLength(iv.len()));
        }
        Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidLength(key.len()))
    }
}

impl SubsectionCipher for AesGcmCipher {
    fn encrypt(&self, key: &[u8], plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Self::cipher(key, iv)?
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LENGTH {
            return Err(CryptoError::DecryptionFailed);
        }
        Self::cipher(key, iv)?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
