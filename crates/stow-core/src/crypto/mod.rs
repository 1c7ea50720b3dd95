//! Cryptographic operations for the secure engine.
//!
//! - **PBKDF2-HMAC-SHA256** derives a fresh AES-256 key per envelope from
//!   the password and the envelope's random salt.
//! - **AES-GCM** seals the JSON payload; the authentication tag makes a
//!   wrong password or a tampered envelope fail loudly.
//! - **SHA-256** of the password names the keyspace when no explicit
//!   namespace is configured.
//!
//! Password material lives only in memory, is zeroized on drop, and never
//! appears in `Debug` output.

pub mod envelope;
pub mod key;

pub use envelope::{open, seal, CipherParams, IvSize};
pub use key::{namespace_digest, AesKey, PasswordKey};
