//! Storage engines.
//!
//! - [`BaseStorage`]: backend resolution, namespacing, mirroring, watches
//! - [`Storage`]: plain JSON values
//! - [`SecureStorage`]: password-encrypted values

mod base;
mod plain;
mod secure;
mod traits;
pub mod watch;

pub use base::{BaseStorage, StorageOptions};
pub use plain::{JsonParser, Storage};
pub use secure::{
    EnvelopeCipher, SecureOptions, SecureStorage, DEFAULT_ITERATIONS, DEFAULT_IV_SIZE,
    DEFAULT_NS_SEPARATOR, DEFAULT_NS_SIZE, DEFAULT_SALT_SIZE,
};
pub use traits::{StorageEngine, StorageEngineExt};
pub use watch::{CallbackMap, ValueParser, WatchCallback, WatchRegistry};
