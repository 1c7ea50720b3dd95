//! Error types for stow core operations.
//!
//! Backend unavailability is deliberately absent from this hierarchy: an
//! engine with no reachable backend reads `None` and writes nothing.
//! Malformed plain JSON is recovered locally and never surfaces here either.

use thiserror::Error;

/// Result type alias for stow operations.
pub type Result<T> = std::result::Result<T, StowError>;

/// Core error type for stow operations.
#[derive(Debug, Error)]
pub enum StowError {
    /// The write would push the storage area past its quota
    #[error("ABORTED - New value would exceed storage quota ({projected}/{quota} bytes)")]
    QuotaExceeded { projected: u64, quota: u64 },

    /// Wrong password, or a corrupted or truncated envelope
    #[error("Decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    /// A secure operation was attempted before `set_password`
    #[error("Password not set, please first call set_password")]
    PasswordNotSet,

    /// Encryption or key derivation error
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Write attempted against a read-only storage area
    #[error("Storage area {0} is read-only")]
    ReadOnlyArea(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}
