//! Adapter for callback-style area clients.
//!
//! Older primary backends hand results to a completion callback instead of
//! returning futures. [`Promisified`] wraps such a client behind the async
//! [`AreaClient`] contract, and [`AreaBinding`] lets a backend say which
//! convention it speaks so the engine can pick the adapter once, when it is
//! constructed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{AreaClient, ValueMap};
use crate::error::{Result, StowError};

/// Completion callback receiving the outcome of one backend call.
pub type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Area client using completion callbacks.
pub trait CallbackAreaClient: Send + Sync {
    fn get(&self, keys: Option<Vec<String>>, callback: Callback<ValueMap>);

    fn set(&self, items: ValueMap, callback: Callback<()>);

    fn remove(&self, keys: Vec<String>, callback: Callback<()>);

    fn clear(&self, callback: Callback<()>);

    fn supports_bytes_in_use(&self) -> bool {
        false
    }

    fn get_bytes_in_use(&self, _keys: Option<Vec<String>>, callback: Callback<u64>) {
        callback(Err(StowError::Backend(
            "getBytesInUse is not supported by this area".to_string(),
        )));
    }

    fn quota_bytes(&self) -> Option<u64> {
        None
    }
}

/// Async view over a [`CallbackAreaClient`].
pub struct Promisified {
    inner: Arc<dyn CallbackAreaClient>,
}

impl Promisified {
    pub fn new(inner: Arc<dyn CallbackAreaClient>) -> Self {
        Self { inner }
    }

    /// Run `call` with a callback that resolves the returned future.
    async fn settle<T, F>(call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Callback<T>),
    {
        let (tx, rx) = oneshot::channel();
        let done: Callback<T> = Box::new(move |result| {
            let _ = tx.send(result);
        });
        call(done);
        rx.await.map_err(|_| {
            StowError::Backend("Backend dropped the callback without answering".to_string())
        })?
    }
}

#[async_trait]
impl AreaClient for Promisified {
    async fn get(&self, keys: Option<&[String]>) -> Result<ValueMap> {
        let keys = keys.map(|keys| keys.to_vec());
        Self::settle(|done| self.inner.get(keys, done)).await
    }

    async fn set(&self, items: ValueMap) -> Result<()> {
        Self::settle(|done| self.inner.set(items, done)).await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        Self::settle(|done| self.inner.remove(keys, done)).await
    }

    async fn clear(&self) -> Result<()> {
        Self::settle(|done| self.inner.clear(done)).await
    }

    fn supports_bytes_in_use(&self) -> bool {
        self.inner.supports_bytes_in_use()
    }

    async fn get_bytes_in_use(&self, keys: Option<&[String]>) -> Result<u64> {
        let keys = keys.map(|keys| keys.to_vec());
        Self::settle(|done| self.inner.get_bytes_in_use(keys, done)).await
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.inner.quota_bytes()
    }
}

/// An area client in the calling convention its backend provides.
#[derive(Clone)]
pub enum AreaBinding {
    Async(Arc<dyn AreaClient>),
    Callback(Arc<dyn CallbackAreaClient>),
}

impl AreaBinding {
    /// Normalize to the async contract, wrapping callback clients once.
    pub fn into_client(self) -> Arc<dyn AreaClient> {
        match self {
            AreaBinding::Async(client) => client,
            AreaBinding::Callback(client) => Arc::new(Promisified::new(client)),
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(self, AreaBinding::Callback(_))
    }
}
