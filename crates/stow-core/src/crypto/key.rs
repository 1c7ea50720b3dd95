//! Password key material and PBKDF2 derivation.

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, StowError};

/// Length of the derived AES key in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Password material usable only for key derivation.
///
/// There is no accessor for the raw bytes outside this crate: the only
/// thing a caller can do with a `PasswordKey` is derive AES keys from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PasswordKey {
    material: Vec<u8>,
}

impl PasswordKey {
    /// Import a password as derivation material.
    ///
    /// Any string is accepted, including the empty one.
    pub fn import(password: &str) -> Self {
        Self {
            material: password.as_bytes().to_vec(),
        }
    }

    /// Derive the AES-256 key for one envelope.
    pub fn derive(&self, salt: &[u8], iterations: u32) -> Result<AesKey> {
        if iterations == 0 {
            return Err(StowError::InvalidInput(
                "Iterations must be at least 1".to_string(),
            ));
        }
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(&self.material, salt, iterations, &mut key);
        Ok(AesKey { key })
    }
}

impl std::fmt::Debug for PasswordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordKey")
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// A derived AES-256 key, zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct AesKey {
    key: [u8; KEY_LENGTH],
}

impl AesKey {
    /// Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesKey").field("key", &"[REDACTED]").finish()
    }
}

/// Last `size` hex characters of SHA-256(`password`).
///
/// Different passwords land in different namespaces on a shared backend
/// unless their digests collide in those characters.
pub fn namespace_digest(password: &str, size: usize) -> String {
    let digest = hex::encode(Sha256::digest(password.as_bytes()));
    let start = digest.len().saturating_sub(size);
    digest[start..].to_string()
}
