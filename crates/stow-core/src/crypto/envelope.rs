//! The `salt ‖ iv ‖ ciphertext` envelope.
//!
//! Salt and IV lengths are not stored in the envelope; they come from the
//! [`CipherParams`] the engine was configured with, so an envelope written
//! with different sizes cannot be opened.

use aes_gcm::aead::consts::{U12, U16, U32};
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;

use super::key::PasswordKey;
use crate::error::{Result, StowError};

/// AES-GCM IV lengths the cipher is instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSize {
    Bytes12,
    Bytes16,
    Bytes32,
}

impl IvSize {
    pub fn from_len(len: usize) -> Result<Self> {
        match len {
            12 => Ok(IvSize::Bytes12),
            16 => Ok(IvSize::Bytes16),
            32 => Ok(IvSize::Bytes32),
            other => Err(StowError::InvalidInput(format!(
                "Unsupported IV size {} (expected 12, 16 or 32)",
                other
            ))),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IvSize::Bytes12 => 12,
            IvSize::Bytes16 => 16,
            IvSize::Bytes32 => 32,
        }
    }
}

/// Envelope layout and derivation cost, fixed when the password is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    pub iterations: u32,
    pub salt_size: usize,
    pub iv_size: IvSize,
}

impl CipherParams {
    pub fn new(iterations: u32, salt_size: usize, iv_size: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(StowError::InvalidInput(
                "Iterations must be at least 1".to_string(),
            ));
        }
        if salt_size == 0 {
            return Err(StowError::InvalidInput(
                "Salt size must be at least 1 byte".to_string(),
            ));
        }
        Ok(Self {
            iterations,
            salt_size,
            iv_size: IvSize::from_len(iv_size)?,
        })
    }

    fn prefix_size(&self) -> usize {
        self.salt_size + self.iv_size.bytes()
    }
}

fn seal_with<C: Aead + KeyInit>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| StowError::Crypto(format!("Failed to create cipher: {}", e)))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(iv), plaintext)
        .map_err(|e| StowError::Crypto(format!("Encryption failed: {}", e)))
}

fn open_with<C: Aead + KeyInit>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| StowError::Crypto(format!("Failed to create cipher: {}", e)))?;
    cipher
        .decrypt(Nonce::<C>::from_slice(iv), ciphertext)
        .map_err(|_| StowError::DecryptionFailed)
}

/// Encrypt `plaintext` into a fresh envelope with random salt and IV.
pub fn seal(key: &PasswordKey, params: &CipherParams, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = vec![0u8; params.salt_size];
    let mut iv = vec![0u8; params.iv_size.bytes()];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let aes_key = key.derive(&salt, params.iterations)?;
    let ciphertext = match params.iv_size {
        IvSize::Bytes12 => seal_with::<AesGcm<Aes256, U12>>(aes_key.as_bytes(), &iv, plaintext)?,
        IvSize::Bytes16 => seal_with::<AesGcm<Aes256, U16>>(aes_key.as_bytes(), &iv, plaintext)?,
        IvSize::Bytes32 => seal_with::<AesGcm<Aes256, U32>>(aes_key.as_bytes(), &iv, plaintext)?,
    };

    let mut envelope = Vec::with_capacity(params.prefix_size() + ciphertext.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`seal`] with the same key and params.
///
/// A wrong password, a tampered byte, or a truncated envelope all yield
/// [`StowError::DecryptionFailed`].
pub fn open(key: &PasswordKey, params: &CipherParams, envelope: &[u8]) -> Result<Vec<u8>> {
    let prefix = params.prefix_size();
    if envelope.len() < prefix {
        return Err(StowError::DecryptionFailed);
    }
    let (salt, rest) = envelope.split_at(params.salt_size);
    let (iv, ciphertext) = rest.split_at(params.iv_size.bytes());

    let aes_key = key.derive(salt, params.iterations)?;
    match params.iv_size {
        IvSize::Bytes12 => open_with::<AesGcm<Aes256, U12>>(aes_key.as_bytes(), iv, ciphertext),
        IvSize::Bytes16 => open_with::<AesGcm<Aes256, U16>>(aes_key.as_bytes(), iv, ciphertext),
        IvSize::Bytes32 => open_with::<AesGcm<Aes256, U32>>(aes_key.as_bytes(), iv, ciphertext),
    }
}
