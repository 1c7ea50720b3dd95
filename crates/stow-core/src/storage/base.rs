//! Shared engine state: backends, namespace, mirroring and watches.
//!
//! `BaseStorage` works on raw stored values. Concrete engines layer their
//! encoding (plain JSON or encrypted envelopes) on top through the
//! [`StorageEngine`](super::StorageEngine) trait.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::watch::{CallbackMap, ValueParser, WatchRegistry};
use crate::backend::{
    AreaBinding, AreaClient, ChangeSource, Host, StorageArea, ValueMap, WebStorage,
};
use crate::error::Result;
use crate::quota::check_quota;

/// Construction options shared by every engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub area: StorageArea,
    /// Mirror every key to the secondary backend.
    pub all_copied: bool,
    /// Keys (without namespace) mirrored to the secondary backend.
    pub copied_keys: Vec<String>,
}

impl StorageOptions {
    pub fn area(area: StorageArea) -> Self {
        Self {
            area,
            ..Self::default()
        }
    }

    pub fn all_copied(mut self) -> Self {
        self.all_copied = true;
        self
    }

    pub fn copied_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.copied_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Backend handles and bookkeeping common to the plain and secure engines.
pub struct BaseStorage {
    area: StorageArea,
    web_app: bool,
    primary: Option<Arc<dyn AreaClient>>,
    web: Option<Arc<dyn WebStorage>>,
    events: Option<Arc<dyn ChangeSource>>,
    all_copied: bool,
    mirroring: RwLock<bool>,
    copied_keys: RwLock<HashSet<String>>,
    namespace: RwLock<String>,
    watches: WatchRegistry,
}

impl BaseStorage {
    /// Resolve reachable backends from `host` once, up front.
    pub fn new(host: Host, options: StorageOptions) -> Self {
        let (primary, events) = match (&host.extension, host.web_app) {
            (Some(extension), false) => (
                extension.area(options.area).map(AreaBinding::into_client),
                Some(extension.on_changed()),
            ),
            _ => (None, None),
        };

        let mirroring = options.all_copied || !options.copied_keys.is_empty() || host.web_app;
        debug!(
            area = %options.area,
            primary = primary.is_some(),
            secondary = host.web.is_some(),
            web_app = host.web_app,
            "storage engine initialised"
        );

        Self {
            area: options.area,
            web_app: host.web_app,
            primary,
            web: host.web,
            events,
            all_copied: options.all_copied,
            mirroring: RwLock::new(mirroring),
            copied_keys: RwLock::new(options.copied_keys.into_iter().collect()),
            namespace: RwLock::new(String::new()),
            watches: WatchRegistry::new(),
        }
    }

    pub fn area(&self) -> StorageArea {
        self.area
    }

    pub fn is_web_app(&self) -> bool {
        self.web_app
    }

    pub fn all_copied(&self) -> bool {
        self.all_copied
    }

    pub fn has_extension_api(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_web_api(&self) -> bool {
        self.web.is_some()
    }

    pub fn is_watch_supported(&self) -> bool {
        self.has_extension_api() && self.events.is_some() && self.area != StorageArea::Managed
    }

    pub(crate) fn primary_client(&self) -> Option<Arc<dyn AreaClient>> {
        self.primary.clone()
    }

    /// The backend's raw change source, if one is reachable.
    pub fn change_source(&self) -> Option<Arc<dyn ChangeSource>> {
        self.events.clone()
    }

    fn secondary(&self) -> Option<&Arc<dyn WebStorage>> {
        let mirroring = *self.mirroring.read().unwrap_or_else(PoisonError::into_inner);
        if mirroring {
            self.web.as_ref()
        } else {
            None
        }
    }

    // --- Namespacing ---

    pub fn namespace(&self) -> String {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *self.namespace.write().unwrap_or_else(PoisonError::into_inner) = namespace.into();
    }

    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace(), key)
    }

    pub fn unnamespaced_key(&self, ns_key: &str) -> String {
        let namespace = self.namespace();
        ns_key
            .strip_prefix(namespace.as_str())
            .unwrap_or(ns_key)
            .to_string()
    }

    pub fn is_valid_key(&self, ns_key: &str) -> bool {
        ns_key.starts_with(self.namespace().as_str())
    }

    // --- Copy set ---

    /// Replace the copy set; a non-empty list turns mirroring on.
    pub fn set_copied_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: HashSet<String> = keys.into_iter().map(Into::into).collect();
        if !keys.is_empty() {
            *self.mirroring.write().unwrap_or_else(PoisonError::into_inner) = true;
        }
        *self.copied_keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    /// Whether `key` (without namespace) is mirrored to the secondary backend.
    pub fn is_copied(&self, key: &str) -> bool {
        self.has_web_api()
            && (self.all_copied
                || self.web_app
                || self
                    .copied_keys
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains(key))
    }

    fn is_copied_ns(&self, ns_key: &str) -> bool {
        self.is_copied(&self.unnamespaced_key(ns_key))
    }

    // --- Raw operations on namespaced keys ---

    pub async fn raw_get(&self, ns_key: &str) -> Result<Option<Value>> {
        if let Some(primary) = &self.primary {
            let keys = [ns_key.to_string()];
            let mut items = primary.get(Some(&keys[..])).await?;
            return Ok(items.remove(ns_key));
        }

        if self.is_copied_ns(ns_key) {
            if let Some(web) = self.secondary() {
                return Ok(web.get_item(ns_key).map(Value::String));
            }
        }
        Ok(None)
    }

    /// Write `value` under `ns_key`, returning the quota warning.
    pub async fn raw_set(&self, ns_key: &str, value: String) -> Result<String> {
        let warning = check_quota(self, ns_key, &value).await?;

        if self.is_copied_ns(ns_key) {
            if let Some(web) = self.secondary() {
                web.set_item(ns_key, &value)?;
            }
        }

        if let Some(primary) = &self.primary {
            let mut items = ValueMap::new();
            items.insert(ns_key.to_string(), Value::String(value));
            primary.set(items).await?;
        }
        Ok(warning)
    }

    pub async fn raw_remove(&self, ns_key: &str) -> Result<()> {
        if self.is_copied_ns(ns_key) {
            if let Some(web) = self.secondary() {
                web.remove_item(ns_key)?;
            }
        }

        if let Some(primary) = &self.primary {
            primary.remove(&[ns_key.to_string()]).await?;
        }
        Ok(())
    }

    /// Every raw entry, namespaced or not, from whichever backend is the source.
    pub async fn raw_get_all(&self) -> Result<ValueMap> {
        if let Some(primary) = &self.primary {
            return primary.get(None).await;
        }

        let mut items = ValueMap::new();
        if let Some(web) = self.secondary() {
            for index in 0..web.len() {
                if let Some(key) = web.key(index) {
                    if let Some(value) = web.get_item(&key) {
                        items.insert(key, Value::String(value));
                    }
                }
            }
        }
        Ok(items)
    }

    /// Raw entries in this namespace, keyed by namespaced key.
    async fn namespaced_entries(&self) -> Result<ValueMap> {
        let namespace = self.namespace();
        Ok(self
            .raw_get_all()
            .await?
            .into_iter()
            .filter(|(key, _)| key.starts_with(namespace.as_str()))
            .collect())
    }

    /// Raw entries in this namespace with the prefix stripped.
    pub async fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        let namespace = self.namespace();
        Ok(self
            .namespaced_entries()
            .await?
            .into_iter()
            .map(|(key, value)| (key[namespace.len()..].to_string(), value))
            .collect())
    }

    pub async fn remove_all(&self) -> Result<()> {
        for ns_key in self.namespaced_entries().await?.into_keys() {
            self.raw_remove(&ns_key).await?;
        }
        Ok(())
    }

    /// Copy raw values from the primary to the secondary backend.
    ///
    /// With `key` only that key is copied, and only if it is in the copy
    /// set. Returns whether any secondary value changed.
    pub async fn copy(&self, key: Option<&str>) -> Result<bool> {
        if !self.all_copied || !self.has_extension_api() {
            return Ok(false);
        }
        if let Some(key) = key {
            let listed = self
                .copied_keys
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(key);
            if !listed {
                return Ok(false);
            }
        }
        let web = match self.secondary() {
            Some(web) => Arc::clone(web),
            None => return Ok(false),
        };

        let entries = match key {
            Some(key) => {
                let ns_key = self.namespaced_key(key);
                match self.raw_get(&ns_key).await? {
                    Some(value) => BTreeMap::from([(ns_key, value)]),
                    None => BTreeMap::new(),
                }
            }
            None => self.namespaced_entries().await?,
        };

        let mut updated = false;
        for (ns_key, value) in entries {
            let text = match value {
                Value::String(text) => text,
                other => serde_json::to_string(&other)?,
            };
            if web.get_item(&ns_key).as_deref() != Some(text.as_str()) {
                web.set_item(&ns_key, &text)?;
                updated = true;
            }
        }
        debug!(updated, "copied primary entries to secondary");
        Ok(updated)
    }

    pub async fn clear(&self, include_copies: bool) -> Result<()> {
        if let Some(primary) = &self.primary {
            primary.clear().await?;
        }
        if include_copies {
            if let Some(web) = &self.web {
                web.clear()?;
            }
        }
        Ok(())
    }

    // --- Watching ---

    /// Register callbacks; returns `false` when watching is unsupported.
    pub fn watch(&self, callbacks: &CallbackMap, parser: Arc<dyn ValueParser>) -> bool {
        let source = match (&self.events, self.is_watch_supported()) {
            (Some(source), true) => source,
            _ => return false,
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("watch requires a running Tokio runtime");
                return false;
            }
        };

        for (key, callback) in callbacks {
            self.watches.subscribe(
                &self.namespaced_key(key),
                Arc::clone(callback),
                self.area,
                source,
                Arc::clone(&parser),
                &runtime,
            );
        }
        true
    }

    pub fn unwatch(&self, callbacks: &CallbackMap) -> bool {
        let source = match (&self.events, self.is_watch_supported()) {
            (Some(source), true) => source,
            _ => return false,
        };
        for (key, callback) in callbacks {
            self.watches
                .unsubscribe(&self.namespaced_key(key), callback, source);
        }
        true
    }

    pub fn unwatch_all(&self) -> bool {
        match &self.events {
            Some(source) if self.is_watch_supported() => {
                self.watches.clear(source);
                true
            }
            _ => false,
        }
    }

    pub fn watch_registry(&self) -> &WatchRegistry {
        &self.watches
    }
}

impl Drop for BaseStorage {
    fn drop(&mut self) {
        if let Some(source) = &self.events {
            self.watches.clear(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryExtension, MemoryWebStorage};
    use serde_json::json;

    fn engine(options: StorageOptions) -> (BaseStorage, Arc<MemoryExtension>, Arc<MemoryWebStorage>) {
        let extension = Arc::new(MemoryExtension::new());
        let web = Arc::new(MemoryWebStorage::new());
        let host = Host::detached()
            .with_extension(extension.clone())
            .with_web(web.clone());
        (BaseStorage::new(host, options), extension, web)
    }

    #[test]
    fn test_namespace_inverse() {
        let (base, _, _) = engine(StorageOptions::default());
        base.set_namespace("ns|:|");
        let ns_key = base.namespaced_key("token");
        assert_eq!(ns_key, "ns|:|token");
        assert!(base.is_valid_key(&ns_key));
        assert_eq!(base.unnamespaced_key(&ns_key), "token");
        assert!(!base.is_valid_key("other|:|token"));
    }

    #[test]
    fn test_capabilities_follow_host() {
        let detached = BaseStorage::new(Host::detached(), StorageOptions::default());
        assert!(!detached.has_extension_api());
        assert!(!detached.has_web_api());
        assert!(!detached.is_watch_supported());

        let (managed, _, _) = engine(StorageOptions::area(StorageArea::Managed));
        assert!(managed.has_extension_api());
        assert!(!managed.is_watch_supported());
    }

    #[test]
    fn test_copied_keys_need_secondary() {
        let (base, _, _) = engine(StorageOptions::default().copied_keys(["a"]));
        assert!(base.is_copied("a"));
        assert!(!base.is_copied("b"));

        let no_web = BaseStorage::new(
            Host::detached().with_extension(Arc::new(MemoryExtension::new())),
            StorageOptions::default().all_copied(),
        );
        assert!(!no_web.is_copied("a"));
    }

    #[tokio::test]
    async fn test_set_mirrors_copied_keys_only() {
        let (base, extension, web) = engine(StorageOptions::area(StorageArea::Local).copied_keys(["a"]));
        base.raw_set("a", "1".to_string()).await.unwrap();
        base.raw_set("b", "2".to_string()).await.unwrap();

        assert_eq!(web.get_item("a").as_deref(), Some("1"));
        assert_eq!(web.get_item("b"), None);
        let local = extension.store(StorageArea::Local).unwrap();
        assert_eq!(local.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_copy_refused_without_all_copied() {
        let (base, _, _) = engine(StorageOptions::default().copied_keys(["a"]));
        base.raw_set("a", "1".to_string()).await.unwrap();
        assert!(!base.copy(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_reports_changes() {
        let (base, extension, web) = engine(StorageOptions::default().all_copied());
        let sync = extension.store(StorageArea::Sync).unwrap();
        let mut items = ValueMap::new();
        items.insert("a".to_string(), json!("1"));
        items.insert("b".to_string(), json!({"n": 2}));
        sync.write(items).unwrap();

        assert!(base.copy(None).await.unwrap());
        assert_eq!(web.get_item("b").as_deref(), Some("{\"n\":2}"));
        assert!(!base.copy(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_detached_engine_degrades_to_noops() {
        let base = BaseStorage::new(Host::detached(), StorageOptions::default());
        assert_eq!(base.raw_set("k", "v".to_string()).await.unwrap(), "");
        assert_eq!(base.raw_get("k").await.unwrap(), None);
        assert!(base.get_all().await.unwrap().is_empty());
        base.clear(true).await.unwrap();
        assert!(!base.copy(None).await.unwrap());
    }
}
