//! # Stow Core
//!
//! Core library for Stow - a layered key-value storage engine with plain and
//! password-encrypted variants.
//!
//! This crate provides the engines, backend contracts and reference backends
//! independent of the CLI interface.
//!
//! ## Architecture
//!
//! - **backend**: Primary (partitioned, async) and secondary (flat, sync) backend contracts
//! - **storage**: Plain and secure engines, mirroring, change notifications
//! - **crypto**: PBKDF2 key derivation and the AES-GCM envelope
//! - **quota**: Byte-accurate pre-write quota guard
//! - **diagnostics**: Table dumps and live change reports

pub mod backend;
pub mod crypto;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod quota;
pub mod storage;

pub use backend::{Host, StorageArea, StorageChange};
pub use error::{Result, StowError};
pub use storage::{
    SecureOptions, SecureStorage, Storage, StorageEngine, StorageEngineExt, StorageOptions,
};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
