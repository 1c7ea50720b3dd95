//! Password-encrypted engine.
//!
//! Values are JSON-encoded, sealed into a `salt ‖ iv ‖ ciphertext` envelope
//! with a key derived per envelope from the password, and stored as
//! standard base64 text. The password material lives only in memory; a new
//! process must call [`SecureStorage::set_password`] again.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, info};

use super::base::{BaseStorage, StorageOptions};
use super::traits::StorageEngine;
use super::watch::ValueParser;
use crate::backend::Host;
use crate::crypto::{self, namespace_digest, CipherParams, PasswordKey};
use crate::error::{Result, StowError};

pub const DEFAULT_ITERATIONS: u32 = 147_000;
pub const DEFAULT_SALT_SIZE: usize = 16;
pub const DEFAULT_IV_SIZE: usize = 32;
pub const DEFAULT_NS_SIZE: usize = 8;
pub const DEFAULT_NS_SEPARATOR: &str = "|:|";

/// Options for [`SecureStorage::set_password`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureOptions {
    pub iterations: u32,
    pub salt_size: usize,
    /// One of 12, 16 or 32.
    pub iv_size: usize,
    /// Explicit namespace; derived from the password hash when `None`.
    pub namespace: Option<String>,
    /// Hex characters of the password hash used as namespace.
    pub ns_size: usize,
    pub ns_separator: String,
}

impl Default for SecureOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            salt_size: DEFAULT_SALT_SIZE,
            iv_size: DEFAULT_IV_SIZE,
            namespace: None,
            ns_size: DEFAULT_NS_SIZE,
            ns_separator: DEFAULT_NS_SEPARATOR.to_string(),
        }
    }
}

impl SecureOptions {
    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

struct Keyring {
    key: Arc<PasswordKey>,
    params: CipherParams,
}

/// Password state plus the encrypt/decrypt passes.
#[derive(Default)]
pub struct EnvelopeCipher {
    keyring: RwLock<Option<Keyring>>,
}

impl EnvelopeCipher {
    fn install(&self, key: PasswordKey, params: CipherParams) {
        *self.keyring.write().unwrap_or_else(PoisonError::into_inner) = Some(Keyring {
            key: Arc::new(key),
            params,
        });
    }

    fn current(&self) -> Result<(Arc<PasswordKey>, CipherParams)> {
        self.keyring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|keyring| (Arc::clone(&keyring.key), keyring.params))
            .ok_or(StowError::PasswordNotSet)
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ok()
    }

    /// Seal `plaintext` and return the base64 envelope.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (key, params) = self.current()?;
        let plaintext = plaintext.as_bytes().to_vec();
        // PBKDF2 is CPU bound; keep it off the async workers.
        let envelope = tokio::task::spawn_blocking(move || crypto::seal(&key, &params, &plaintext))
            .await
            .map_err(|e| StowError::Crypto(format!("Encryption task failed: {}", e)))??;
        Ok(STANDARD.encode(envelope))
    }

    /// Open a base64 envelope.
    ///
    /// # Errors
    ///
    /// `StowError::DecryptionFailed` for bad base64, a truncated envelope,
    /// a wrong password or a tampered payload.
    pub async fn decrypt(&self, envelope: &str) -> Result<String> {
        let (key, params) = self.current()?;
        let envelope = STANDARD
            .decode(envelope.trim())
            .map_err(|_| StowError::DecryptionFailed)?;
        let plaintext = tokio::task::spawn_blocking(move || crypto::open(&key, &params, &envelope))
            .await
            .map_err(|e| StowError::Crypto(format!("Decryption task failed: {}", e)))??;
        String::from_utf8(plaintext).map_err(|_| StowError::DecryptionFailed)
    }
}

#[async_trait]
impl ValueParser for EnvelopeCipher {
    async fn parse_value(&self, raw: Option<Value>) -> Result<Option<Value>> {
        match raw {
            None => Ok(None),
            Some(Value::String(envelope)) => {
                let plaintext = self.decrypt(&envelope).await?;
                Ok(Some(serde_json::from_str(&plaintext)?))
            }
            Some(_) => Err(StowError::DecryptionFailed),
        }
    }
}

/// Engine storing values as encrypted envelopes.
pub struct SecureStorage {
    base: BaseStorage,
    cipher: Arc<EnvelopeCipher>,
}

impl SecureStorage {
    pub fn new(host: Host, options: StorageOptions) -> Self {
        Self {
            base: BaseStorage::new(host, options),
            cipher: Arc::new(EnvelopeCipher::default()),
        }
    }

    /// Install the password and select the namespace.
    ///
    /// Without an explicit namespace, the last `ns_size` hex characters of
    /// SHA-256(password) are used, so different passwords address disjoint
    /// keys on a shared backend.
    pub fn set_password(&self, password: &str, options: SecureOptions) -> Result<()> {
        let params = CipherParams::new(options.iterations, options.salt_size, options.iv_size)?;
        let key = PasswordKey::import(password);

        let namespace = match options.namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => {
                format!("{}{}", namespace, options.ns_separator)
            }
            _ => format!(
                "{}{}",
                namespace_digest(password, options.ns_size),
                options.ns_separator
            ),
        };

        self.cipher.install(key, params);
        self.base.set_namespace(namespace);
        debug!(iterations = params.iterations, "password set");
        Ok(())
    }

    pub fn has_password(&self) -> bool {
        self.cipher.is_ready()
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        self.cipher.encrypt(plaintext).await
    }

    pub async fn decrypt(&self, envelope: &str) -> Result<String> {
        self.cipher.decrypt(envelope).await
    }

    /// Re-encrypt every entry of this namespace under `target`'s password.
    ///
    /// Returns the number of migrated keys. A failure midway leaves some
    /// keys migrated and some not; running it again is safe.
    pub async fn migrate(&self, target: &SecureStorage) -> Result<usize> {
        let keys: Vec<String> = self.get_all().await?.into_keys().collect();
        let mut migrated = 0;
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                target.set(&key, &value).await?;
                migrated += 1;
            }
        }
        info!(migrated, "migrated entries to new password");
        Ok(migrated)
    }
}

#[async_trait]
impl StorageEngine for SecureStorage {
    fn base(&self) -> &BaseStorage {
        &self.base
    }

    fn parser(&self) -> Arc<dyn ValueParser> {
        self.cipher.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.cipher.current()?;
        let raw = self.base.raw_get(&self.base.namespaced_key(key)).await?;
        self.cipher.parse_value(raw).await
    }

    async fn set(&self, key: &str, value: &Value) -> Result<String> {
        let envelope = self.cipher.encrypt(&serde_json::to_string(value)?).await?;
        self.base
            .raw_set(&self.base.namespaced_key(key), envelope)
            .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.cipher.current()?;
        self.base.raw_remove(&self.base.namespaced_key(key)).await
    }
}
