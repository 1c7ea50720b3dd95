//! Backend contracts consumed by the storage engine.
//!
//! Two kinds of backend sit underneath an engine:
//!
//! - **Primary**: a partitioned, async key-value store ([`ExtensionApi`]),
//!   one [`AreaClient`] per [`StorageArea`], with byte-usage introspection
//!   and a shared change-event source.
//! - **Secondary**: a synchronous flat string store ([`WebStorage`]) used
//!   as a mirror for copied keys and as the sole store in web-app mode.
//!
//! Reference implementations live in [`memory`] (in-process) and [`file`]
//! (one JSON file per area). Legacy callback-style area clients are adapted
//! in [`callback`].

pub mod callback;
pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StowError};

pub use callback::{AreaBinding, CallbackAreaClient, Promisified};
pub use file::{FileExtension, FileWebStorage};
pub use memory::{AreaStore, MemoryExtension, MemoryWebStorage};

/// Environment variable that switches a host into web-app mode.
pub const WEB_APP_ENV: &str = "STOW_WEB_APP";

/// Raw key/value pairs as held by a primary backend.
pub type ValueMap = BTreeMap<String, Value>;

/// Named partition of the primary backend.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StorageArea {
    #[default]
    Sync,
    Local,
    Session,
    Managed,
}

impl StorageArea {
    pub const ALL: [StorageArea; 4] = [
        StorageArea::Sync,
        StorageArea::Local,
        StorageArea::Session,
        StorageArea::Managed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageArea::Sync => "sync",
            StorageArea::Local => "local",
            StorageArea::Session => "session",
            StorageArea::Managed => "managed",
        }
    }

    /// Managed storage is provisioned by policy and never written by us.
    pub fn is_read_only(self) -> bool {
        matches!(self, StorageArea::Managed)
    }

    /// Default quota of the area in bytes, `None` when unbounded.
    pub fn default_quota_bytes(self) -> Option<u64> {
        match self {
            StorageArea::Sync => Some(102_400),
            StorageArea::Local | StorageArea::Session => Some(10_485_760),
            StorageArea::Managed => None,
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageArea {
    type Err = StowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(StorageArea::Sync),
            "local" => Ok(StorageArea::Local),
            "session" => Ok(StorageArea::Session),
            "managed" => Ok(StorageArea::Managed),
            other => Err(StowError::InvalidInput(format!(
                "Unknown storage area: {}",
                other
            ))),
        }
    }
}

/// Old and new value of one key. `None` means absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Changes fired together by one backend mutation, keyed by raw key.
pub type ChangeSet = BTreeMap<String, StorageChange>;

/// Native change listener, invoked synchronously by the backend.
pub type ChangeListener = Arc<dyn Fn(&ChangeSet, StorageArea) + Send + Sync>;

/// Handle returned by [`ChangeSource::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Backend-wide change event source, shared by all areas.
pub trait ChangeSource: Send + Sync {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId;

    /// Returns whether a listener was removed.
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn listener_count(&self) -> usize;
}

/// Listener list used by the reference backends.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `changes` to every listener, in registration order.
    ///
    /// Listeners are called outside the registry lock so they may add or
    /// remove listeners themselves.
    pub fn emit(&self, changes: &ChangeSet, area: StorageArea) {
        if changes.is_empty() {
            return;
        }
        let snapshot: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(changes, area);
        }
    }
}

impl ChangeSource for ListenerRegistry {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Async client for one storage area of the primary backend.
#[async_trait]
pub trait AreaClient: Send + Sync {
    /// Read the given keys, or every entry when `keys` is `None`.
    /// Missing keys are simply absent from the result.
    async fn get(&self, keys: Option<&[String]>) -> Result<ValueMap>;

    async fn set(&self, items: ValueMap) -> Result<()>;

    async fn remove(&self, keys: &[String]) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Whether [`AreaClient::get_bytes_in_use`] is implemented.
    fn supports_bytes_in_use(&self) -> bool {
        false
    }

    /// Bytes used by the given keys, or by the whole area for `None`.
    async fn get_bytes_in_use(&self, _keys: Option<&[String]>) -> Result<u64> {
        Err(StowError::Backend(
            "getBytesInUse is not supported by this area".to_string(),
        ))
    }

    /// Quota of the area, if the backend reports one.
    fn quota_bytes(&self) -> Option<u64> {
        None
    }
}

/// The primary backend: areas plus one change-event source.
pub trait ExtensionApi: Send + Sync {
    /// Client for `area`, in whichever calling convention the backend speaks.
    fn area(&self, area: StorageArea) -> Option<AreaBinding>;

    fn on_changed(&self) -> Arc<dyn ChangeSource>;
}

/// The secondary backend: a synchronous flat string store.
pub trait WebStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key at position `index` in the store's enumeration order.
    fn key(&self, index: usize) -> Option<String>;
}

/// The backends reachable from the current process.
///
/// Engines inspect the host once, at construction; nothing here is probed
/// lazily, so an engine built on an empty host is a harmless no-op.
#[derive(Clone, Default)]
pub struct Host {
    pub extension: Option<Arc<dyn ExtensionApi>>,
    pub web: Option<Arc<dyn WebStorage>>,
    pub web_app: bool,
}

impl Host {
    /// Host with no backends at all.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn new(extension: Option<Arc<dyn ExtensionApi>>, web: Option<Arc<dyn WebStorage>>) -> Self {
        Self {
            extension,
            web,
            web_app: false,
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn ExtensionApi>) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_web(mut self, web: Arc<dyn WebStorage>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn web_app(mut self, enabled: bool) -> Self {
        self.web_app = enabled;
        self
    }

    /// Apply `STOW_WEB_APP=true` from the environment.
    pub fn with_env(self) -> Self {
        let enabled = std::env::var(WEB_APP_ENV)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        self.web_app(enabled)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("extension", &self.extension.is_some())
            .field("web", &self.web.is_some())
            .field("web_app", &self.web_app)
            .finish()
    }
}

/// Byte usage of one entry as the reference backends account it:
/// the key plus the JSON serialization of the value.
pub fn entry_bytes(key: &str, value: &Value) -> u64 {
    let serialized = serde_json::to_string(value).unwrap_or_default();
    (key.len() + serialized.len()) as u64
}
