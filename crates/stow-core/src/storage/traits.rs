//! Storage engine trait definition.
//!
//! The `StorageEngine` trait is the interface shared by the plain and the
//! secure engine. Implementors supply value encoding (`get`, `set`,
//! `remove`, and a [`ValueParser`] for change events); everything that only
//! moves raw values around is provided on top of [`BaseStorage`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::base::BaseStorage;
use super::watch::{CallbackMap, ValueParser};
use crate::backend::StorageArea;
use crate::error::Result;

/// Engine interface over a primary and an optional secondary backend.
///
/// All implementations must ensure:
/// - Keys are namespaced before they reach a backend
/// - Every primary write passes the quota guard first
/// - Unreachable backends degrade to `None` / no-ops, never panics
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Shared backend state.
    fn base(&self) -> &BaseStorage;

    /// Parser turning raw stored values back into caller values.
    fn parser(&self) -> Arc<dyn ValueParser>;

    /// Read `key`, decoded.
    ///
    /// Returns `Ok(None)` when the key is missing or no backend holds it.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Encode and write `value` under `key`.
    ///
    /// # Returns
    ///
    /// The quota warning, empty when usage stays under 80%.
    ///
    /// # Errors
    ///
    /// Returns `StowError::QuotaExceeded` before writing anything when the
    /// projected usage would pass the area quota.
    async fn set(&self, key: &str, value: &Value) -> Result<String>;

    /// Remove `key` from the primary, and from the secondary if copied.
    async fn remove(&self, key: &str) -> Result<()>;

    fn area(&self) -> StorageArea {
        self.base().area()
    }

    /// Raw (still encoded) values in this namespace, prefix stripped.
    async fn get_all(&self) -> Result<BTreeMap<String, Value>> {
        self.base().get_all().await
    }

    /// Remove every key in this namespace.
    async fn remove_all(&self) -> Result<()> {
        self.base().remove_all().await
    }

    /// One-way copy of raw values from the primary to the secondary.
    async fn copy(&self, key: Option<&str>) -> Result<bool> {
        self.base().copy(key).await
    }

    async fn clear(&self, include_copies: bool) -> Result<()> {
        self.base().clear(include_copies).await
    }

    /// Subscribe callbacks to keys; `false` if watching is unsupported.
    fn watch(&self, callbacks: &CallbackMap) -> bool {
        self.base().watch(callbacks, self.parser())
    }

    fn unwatch(&self, callbacks: &CallbackMap) -> bool {
        self.base().unwatch(callbacks)
    }

    fn unwatch_all(&self) -> bool {
        self.base().unwatch_all()
    }

    /// Decode a raw stored value the way `get` does.
    async fn parse_value(&self, raw: Option<Value>) -> Result<Option<Value>> {
        self.parser().parse_value(raw).await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>> {
        self.get(key).await
    }

    /// Like `set`, dropping the quota warning.
    async fn set_item(&self, key: &str, value: &Value) -> Result<()> {
        self.set(key, value).await.map(|_| ())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.remove(key).await
    }

    fn set_copied_keys(&self, keys: Vec<String>) {
        self.base().set_copied_keys(keys)
    }
}

/// Typed access through serde.
#[async_trait]
pub trait StorageEngineExt: StorageEngine {
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T) -> Result<String>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, &value).await
    }
}

impl<E: StorageEngine + ?Sized> StorageEngineExt for E {}
