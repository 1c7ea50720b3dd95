//! In-process reference backends.
//!
//! [`AreaStore`] holds one storage area and is shared by the memory and file
//! backends; the file backend only adds a persistence path. Change events
//! are fired synchronously after each committed mutation, in commit order,
//! even when several threads write the same area.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::callback::{AreaBinding, Callback, CallbackAreaClient};
use super::{
    entry_bytes, AreaClient, ChangeSet, ChangeSource, ExtensionApi, ListenerRegistry,
    StorageArea, StorageChange, ValueMap, WebStorage,
};
use crate::error::{Result, StowError};

/// One storage area: entries, quota, and a handle to the shared event source.
pub struct AreaStore {
    area: StorageArea,
    data: Mutex<ValueMap>,
    emit_order: Mutex<()>,
    quota_bytes: Mutex<Option<u64>>,
    bytes_in_use_supported: AtomicBool,
    persist_path: Option<PathBuf>,
    events: Arc<ListenerRegistry>,
}

impl AreaStore {
    pub fn new(area: StorageArea, events: Arc<ListenerRegistry>) -> Self {
        Self {
            area,
            data: Mutex::new(ValueMap::new()),
            emit_order: Mutex::new(()),
            quota_bytes: Mutex::new(area.default_quota_bytes()),
            bytes_in_use_supported: AtomicBool::new(true),
            persist_path: None,
            events,
        }
    }

    pub(crate) fn persisted(
        area: StorageArea,
        events: Arc<ListenerRegistry>,
        path: PathBuf,
        initial: ValueMap,
    ) -> Self {
        Self {
            data: Mutex::new(initial),
            persist_path: Some(path),
            ..Self::new(area, events)
        }
    }

    pub fn area(&self) -> StorageArea {
        self.area
    }

    pub fn set_quota_bytes(&self, quota: Option<u64>) {
        *self
            .quota_bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = quota;
    }

    /// Toggle byte-usage introspection, to emulate backends without it.
    pub fn set_bytes_in_use_supported(&self, supported: bool) {
        self.bytes_in_use_supported
            .store(supported, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ValueMap {
        self.lock_data().clone()
    }

    /// Seed entries without read-only checks or change events, the way
    /// policy provisions the managed area.
    pub fn provision(&self, items: ValueMap) -> Result<()> {
        let mut data = self.lock_data();
        self.persist(|on_disk| on_disk.extend(items.clone()))?;
        data.extend(items);
        Ok(())
    }

    pub fn read(&self, keys: Option<&[String]>) -> ValueMap {
        let data = self.lock_data();
        match keys {
            None => data.clone(),
            Some(keys) => keys
                .iter()
                .filter_map(|key| data.get(key).map(|value| (key.clone(), value.clone())))
                .collect(),
        }
    }

    pub fn write(&self, items: ValueMap) -> Result<()> {
        self.ensure_writable()?;
        let mut data = self.lock_data();
        self.persist(|on_disk| on_disk.extend(items.clone()))?;
        let mut changes = ChangeSet::new();
        for (key, value) in items {
            let old_value = data.insert(key.clone(), value.clone());
            if old_value.as_ref() != Some(&value) {
                changes.insert(
                    key,
                    StorageChange {
                        old_value,
                        new_value: Some(value),
                    },
                );
            }
        }
        self.emit_in_order(data, changes);
        Ok(())
    }

    pub fn delete(&self, keys: &[String]) -> Result<()> {
        self.ensure_writable()?;
        let mut data = self.lock_data();
        self.persist(|on_disk| {
            for key in keys {
                on_disk.remove(key);
            }
        })?;
        let mut changes = ChangeSet::new();
        for key in keys {
            if let Some(old_value) = data.remove(key) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        old_value: Some(old_value),
                        new_value: None,
                    },
                );
            }
        }
        self.emit_in_order(data, changes);
        Ok(())
    }

    pub fn wipe(&self) -> Result<()> {
        self.ensure_writable()?;
        let mut data = self.lock_data();
        self.persist(|on_disk| on_disk.clear())?;
        let changes: ChangeSet = std::mem::take(&mut *data)
            .into_iter()
            .map(|(key, old_value)| {
                (
                    key,
                    StorageChange {
                        old_value: Some(old_value),
                        new_value: None,
                    },
                )
            })
            .collect();
        self.emit_in_order(data, changes);
        Ok(())
    }

    pub fn bytes_in_use(&self, keys: Option<&[String]>) -> u64 {
        let data = self.lock_data();
        match keys {
            None => data.iter().map(|(key, value)| entry_bytes(key, value)).sum(),
            Some(keys) => keys
                .iter()
                .filter_map(|key| data.get(key).map(|value| entry_bytes(key, value)))
                .sum(),
        }
    }

    /// Replace the whole area with `fresh`, firing events for the difference.
    /// Nothing is persisted: `fresh` is expected to come from disk.
    pub(crate) fn replace_all(&self, fresh: ValueMap) -> usize {
        let mut data = self.lock_data();
        let mut changes = ChangeSet::new();
        for (key, old_value) in data.iter() {
            if !fresh.contains_key(key) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    },
                );
            }
        }
        for (key, new_value) in &fresh {
            let old_value = data.get(key);
            if old_value != Some(new_value) {
                changes.insert(
                    key.clone(),
                    StorageChange {
                        old_value: old_value.cloned(),
                        new_value: Some(new_value.clone()),
                    },
                );
            }
        }
        *data = fresh;
        let count = changes.len();
        self.emit_in_order(data, changes);
        count
    }

    fn lock_data(&self) -> MutexGuard<'_, ValueMap> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the commit over to the emit queue before releasing `data`, so
    /// events leave in the order the mutations committed. Listeners run
    /// without the data lock and may read the store.
    fn emit_in_order(&self, data: MutexGuard<'_, ValueMap>, changes: ChangeSet) {
        let _turn = self.emit_order.lock().unwrap_or_else(PoisonError::into_inner);
        drop(data);
        self.events.emit(&changes, self.area);
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.area.is_read_only() {
            return Err(StowError::ReadOnlyArea(self.area.to_string()));
        }
        Ok(())
    }

    /// Apply this mutation's keys to the area file, if there is one.
    fn persist(&self, mutate: impl FnOnce(&mut ValueMap)) -> Result<()> {
        match &self.persist_path {
            Some(path) => crate::fs::update_json_map(path, mutate),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AreaClient for AreaStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<ValueMap> {
        Ok(self.read(keys))
    }

    async fn set(&self, items: ValueMap) -> Result<()> {
        self.write(items)
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        self.delete(keys)
    }

    async fn clear(&self) -> Result<()> {
        self.wipe()
    }

    fn supports_bytes_in_use(&self) -> bool {
        self.bytes_in_use_supported.load(Ordering::SeqCst)
    }

    async fn get_bytes_in_use(&self, keys: Option<&[String]>) -> Result<u64> {
        Ok(self.bytes_in_use(keys))
    }

    fn quota_bytes(&self) -> Option<u64> {
        *self
            .quota_bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl CallbackAreaClient for AreaStore {
    fn get(&self, keys: Option<Vec<String>>, callback: Callback<ValueMap>) {
        callback(Ok(self.read(keys.as_deref())));
    }

    fn set(&self, items: ValueMap, callback: Callback<()>) {
        callback(self.write(items));
    }

    fn remove(&self, keys: Vec<String>, callback: Callback<()>) {
        callback(self.delete(&keys));
    }

    fn clear(&self, callback: Callback<()>) {
        callback(self.wipe());
    }

    fn supports_bytes_in_use(&self) -> bool {
        self.bytes_in_use_supported.load(Ordering::SeqCst)
    }

    fn get_bytes_in_use(&self, keys: Option<Vec<String>>, callback: Callback<u64>) {
        callback(Ok(self.bytes_in_use(keys.as_deref())));
    }

    fn quota_bytes(&self) -> Option<u64> {
        *self
            .quota_bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Primary backend held entirely in memory.
pub struct MemoryExtension {
    areas: BTreeMap<StorageArea, Arc<AreaStore>>,
    events: Arc<ListenerRegistry>,
    legacy: bool,
}

impl MemoryExtension {
    pub fn new() -> Self {
        let events = Arc::new(ListenerRegistry::new());
        let areas = StorageArea::ALL
            .iter()
            .map(|area| (*area, Arc::new(AreaStore::new(*area, Arc::clone(&events)))))
            .collect();
        Self::from_areas(areas, events)
    }

    /// Same backend, but its areas speak the callback convention.
    pub fn legacy() -> Self {
        Self {
            legacy: true,
            ..Self::new()
        }
    }

    pub(crate) fn from_areas(
        areas: BTreeMap<StorageArea, Arc<AreaStore>>,
        events: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            areas,
            events,
            legacy: false,
        }
    }

    /// Direct handle on an area, for provisioning and inspection.
    pub fn store(&self, area: StorageArea) -> Option<Arc<AreaStore>> {
        self.areas.get(&area).cloned()
    }

    pub fn events(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.events)
    }

    pub(crate) fn stores(&self) -> impl Iterator<Item = &Arc<AreaStore>> {
        self.areas.values()
    }
}

impl Default for MemoryExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionApi for MemoryExtension {
    fn area(&self, area: StorageArea) -> Option<AreaBinding> {
        let store = self.areas.get(&area)?;
        if self.legacy {
            Some(AreaBinding::Callback(Arc::clone(store) as Arc<dyn CallbackAreaClient>))
        } else {
            Some(AreaBinding::Async(Arc::clone(store) as Arc<dyn AreaClient>))
        }
    }

    fn on_changed(&self) -> Arc<dyn ChangeSource> {
        Arc::clone(&self.events) as Arc<dyn ChangeSource>
    }
}

/// Flat string store held in memory.
#[derive(Default)]
pub struct MemoryWebStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryWebStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_items(items: BTreeMap<String, String>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock_items().clone()
    }

    fn lock_items(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WebStorage for MemoryWebStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.lock_items().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.lock_items().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.lock_items().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock_items().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock_items().len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.lock_items().keys().nth(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn items(pairs: &[(&str, serde_json::Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_write_fires_only_real_changes() {
        let events = Arc::new(ListenerRegistry::new());
        let store = AreaStore::new(StorageArea::Local, Arc::clone(&events));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        events.add_listener(Arc::new(move |changes, area| {
            assert_eq!(area, StorageArea::Local);
            counter.fetch_add(changes.len(), Ordering::SeqCst);
        }));

        store.write(items(&[("a", json!(1))])).unwrap();
        store.write(items(&[("a", json!(1))])).unwrap();
        store.delete(&["a".to_string(), "missing".to_string()]).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_writers_deliver_in_commit_order() {
        for _ in 0..100 {
            let events = Arc::new(ListenerRegistry::new());
            let store = Arc::new(AreaStore::new(StorageArea::Local, Arc::clone(&events)));
            let last = Arc::new(Mutex::new(None));
            let seen = Arc::clone(&last);
            events.add_listener(Arc::new(move |changes, _| {
                if let Some(change) = changes.get("k") {
                    *seen.lock().unwrap() = change.new_value.clone();
                }
            }));

            let writers: Vec<_> = (0..4)
                .map(|writer| {
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || {
                        for n in 0..50 {
                            store.write(items(&[("k", json!(writer * 100 + n))])).unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let committed = store.snapshot().get("k").cloned();
            assert_eq!(*last.lock().unwrap(), committed);
        }
    }

    #[test]
    fn test_managed_area_is_read_only_but_provisionable() {
        let extension = MemoryExtension::new();
        let managed = extension.store(StorageArea::Managed).unwrap();

        assert!(matches!(
            managed.write(items(&[("policy", json!(true))])),
            Err(StowError::ReadOnlyArea(_))
        ));
        managed.provision(items(&[("policy", json!(true))])).unwrap();
        assert_eq!(managed.read(None).len(), 1);
    }

    #[test]
    fn test_bytes_in_use_per_key_and_total() {
        let store = AreaStore::new(StorageArea::Sync, Arc::new(ListenerRegistry::new()));
        store
            .write(items(&[("ab", json!("xy")), ("c", json!(12))]))
            .unwrap();

        // "ab" + "\"xy\"" = 6, "c" + "12" = 3
        assert_eq!(store.bytes_in_use(Some(&["ab".to_string()][..])), 6);
        assert_eq!(store.bytes_in_use(None), 9);
        assert_eq!(store.bytes_in_use(Some(&["nope".to_string()][..])), 0);
    }

    #[test]
    fn test_replace_all_reports_difference() {
        let store = AreaStore::new(StorageArea::Local, Arc::new(ListenerRegistry::new()));
        store
            .write(items(&[("keep", json!(1)), ("drop", json!(2))]))
            .unwrap();

        let changed = store.replace_all(items(&[("keep", json!(1)), ("new", json!(3))]));
        assert_eq!(changed, 2);
        assert!(store.read(None).contains_key("new"));
    }

    #[test]
    fn test_legacy_extension_binds_callback_clients() {
        assert!(MemoryExtension::legacy()
            .area(StorageArea::Sync)
            .unwrap()
            .is_callback());
        assert!(!MemoryExtension::new()
            .area(StorageArea::Sync)
            .unwrap()
            .is_callback());
    }

    #[test]
    fn test_web_storage_enumeration() {
        let web = MemoryWebStorage::new();
        web.set_item("b", "2").unwrap();
        web.set_item("a", "1").unwrap();

        assert_eq!(web.len(), 2);
        assert_eq!(web.key(0).as_deref(), Some("a"));
        assert_eq!(web.key(2), None);

        web.remove_item("a").unwrap();
        assert_eq!(web.get_item("a"), None);
        web.clear().unwrap();
        assert!(web.is_empty());
    }
}
