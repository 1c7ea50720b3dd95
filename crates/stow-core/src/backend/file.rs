//! File-persisted reference backends.
//!
//! Each storage area lives in `<dir>/<area>.json` and the flat store in
//! `<dir>/web_storage.json`. Every mutation re-reads the file under its lock,
//! applies only the keys it touches and replaces the file atomically, so
//! handles sharing a directory never drop each other's keys.
//! Change events only fire inside the writing process; another process
//! observes them by calling [`FileExtension::reload`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::callback::AreaBinding;
use super::memory::{AreaStore, MemoryExtension, MemoryWebStorage};
use super::{ChangeSource, ExtensionApi, ListenerRegistry, StorageArea, ValueMap, WebStorage};
use crate::error::Result;
use crate::fs::{read_json_map, update_json_map};

const WEB_STORAGE_FILE: &str = "web_storage.json";

fn area_path(dir: &Path, area: StorageArea) -> PathBuf {
    dir.join(format!("{}.json", area.as_str()))
}

/// Primary backend persisted as one JSON file per area.
pub struct FileExtension {
    dir: PathBuf,
    inner: MemoryExtension,
}

impl FileExtension {
    /// Open (or lazily create) the backend rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let events = Arc::new(ListenerRegistry::new());
        let mut areas = BTreeMap::new();
        for area in StorageArea::ALL {
            let path = area_path(&dir, area);
            let initial: ValueMap = read_json_map(&path)?;
            debug!(area = %area, entries = initial.len(), path = %path.display(), "loaded area");
            areas.insert(
                area,
                Arc::new(AreaStore::persisted(area, Arc::clone(&events), path, initial)),
            );
        }
        Ok(Self {
            dir,
            inner: MemoryExtension::from_areas(areas, events),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self, area: StorageArea) -> Option<Arc<AreaStore>> {
        self.inner.store(area)
    }

    /// Re-read every area from disk and fire change events for whatever
    /// other processes changed. Returns the number of changed keys.
    pub fn reload(&self) -> Result<usize> {
        let mut changed = 0;
        for store in self.inner.stores() {
            let fresh: ValueMap = read_json_map(&area_path(&self.dir, store.area()))?;
            changed += store.replace_all(fresh);
        }
        Ok(changed)
    }
}

impl ExtensionApi for FileExtension {
    fn area(&self, area: StorageArea) -> Option<AreaBinding> {
        self.inner.area(area)
    }

    fn on_changed(&self) -> Arc<dyn ChangeSource> {
        self.inner.on_changed()
    }
}

/// Secondary backend persisted as a single JSON file.
pub struct FileWebStorage {
    path: PathBuf,
    inner: MemoryWebStorage,
}

impl FileWebStorage {
    /// Open the flat store kept in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(WEB_STORAGE_FILE);
        let items: BTreeMap<String, String> = read_json_map(&path)?;
        Ok(Self {
            path,
            inner: MemoryWebStorage::with_items(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, mutate: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        update_json_map(&self.path, mutate)
    }
}

impl WebStorage for FileWebStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        })?;
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.update(|items| {
            items.remove(key);
        })?;
        self.inner.remove_item(key)
    }

    fn clear(&self) -> Result<()> {
        self.update(BTreeMap::clear)?;
        self.inner.clear()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.inner.key(index)
    }
}
