//! Ref-counted change notification registry.
//!
//! One native listener per namespaced key, no matter how many subscribers
//! watch it. The native listener only forwards the raw change into a
//! channel; a per-key dispatcher task parses values and fans out, one event
//! at a time, so subscribers see a key's changes in backend firing order.
//!
//! Subscriber-set mutations happen under a plain mutex with no await point,
//! so a registration has a native listener exactly while it has subscribers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ChangeListener, ChangeSource, ListenerId, StorageArea, StorageChange};
use crate::error::Result;

/// Subscriber callback, invoked with parsed old/new values.
pub type WatchCallback = Arc<dyn Fn(StorageChange, StorageArea) + Send + Sync>;

/// Callbacks to (un)register, keyed by caller-visible key.
pub type CallbackMap = BTreeMap<String, WatchCallback>;

/// Turns a raw stored value back into the value the caller stored.
#[async_trait]
pub trait ValueParser: Send + Sync {
    async fn parse_value(&self, raw: Option<Value>) -> Result<Option<Value>>;
}

/// Callbacks are identified by the allocation they point to.
fn same_callback(a: &WatchCallback, b: &WatchCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

type Subscribers = Arc<Mutex<Vec<WatchCallback>>>;

fn lock_subscribers(subscribers: &Subscribers) -> MutexGuard<'_, Vec<WatchCallback>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration {
    subscribers: Subscribers,
    listener_id: ListenerId,
}

/// Map from namespaced key to its subscribers and native listener.
#[derive(Default)]
pub struct WatchRegistry {
    registrations: Mutex<HashMap<String, Registration>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `callback` to `ns_key`, registering the native listener
    /// only for the first subscriber.
    pub fn subscribe(
        &self,
        ns_key: &str,
        callback: WatchCallback,
        area: StorageArea,
        source: &Arc<dyn ChangeSource>,
        parser: Arc<dyn ValueParser>,
        runtime: &Handle,
    ) {
        let mut registrations = self.lock();
        if let Some(registration) = registrations.get(ns_key) {
            let mut subscribers = lock_subscribers(&registration.subscribers);
            if !subscribers.iter().any(|existing| same_callback(existing, &callback)) {
                subscribers.push(callback);
            }
            return;
        }

        let subscribers: Subscribers = Arc::new(Mutex::new(vec![callback]));
        let (tx, rx) = mpsc::unbounded_channel::<StorageChange>();
        runtime.spawn(dispatch(
            ns_key.to_string(),
            rx,
            Arc::clone(&subscribers),
            parser,
            area,
        ));

        let key = ns_key.to_string();
        let listener: ChangeListener = Arc::new(move |changes, changed_area| {
            if changed_area != area {
                return;
            }
            if let Some(change) = changes.get(&key) {
                // The receiver is gone only after the registration is torn down.
                let _ = tx.send(change.clone());
            }
        });
        let listener_id = source.add_listener(listener);
        debug!(key = ns_key, area = %area, "registered native listener");

        registrations.insert(
            ns_key.to_string(),
            Registration {
                subscribers,
                listener_id,
            },
        );
    }

    /// Drop `callback` from `ns_key`; the last one out removes the native
    /// listener, which closes the channel and ends the dispatcher.
    pub fn unsubscribe(&self, ns_key: &str, callback: &WatchCallback, source: &Arc<dyn ChangeSource>) {
        let mut registrations = self.lock();
        let now_empty = match registrations.get(ns_key) {
            Some(registration) => {
                let mut subscribers = lock_subscribers(&registration.subscribers);
                subscribers.retain(|existing| !same_callback(existing, callback));
                subscribers.is_empty()
            }
            None => return,
        };

        if now_empty {
            if let Some(registration) = registrations.remove(ns_key) {
                source.remove_listener(registration.listener_id);
                debug!(key = ns_key, "removed native listener");
            }
        }
    }

    /// Tear down every registration.
    pub fn clear(&self, source: &Arc<dyn ChangeSource>) {
        let drained: Vec<Registration> = self.lock().drain().map(|(_, reg)| reg).collect();
        for registration in drained {
            source.remove_listener(registration.listener_id);
        }
    }

    pub fn subscriber_count(&self, ns_key: &str) -> usize {
        self.lock()
            .get(ns_key)
            .map(|registration| lock_subscribers(&registration.subscribers).len())
            .unwrap_or(0)
    }

    /// Number of keys with a live native listener.
    pub fn registration_count(&self) -> usize {
        self.lock().len()
    }
}

async fn dispatch(
    ns_key: String,
    mut rx: mpsc::UnboundedReceiver<StorageChange>,
    subscribers: Subscribers,
    parser: Arc<dyn ValueParser>,
    area: StorageArea,
) {
    while let Some(change) = rx.recv().await {
        let (new_value, old_value) = tokio::join!(
            parser.parse_value(change.new_value),
            parser.parse_value(change.old_value)
        );
        let parsed = match (new_value, old_value) {
            (Ok(new_value), Ok(old_value)) => StorageChange {
                old_value,
                new_value,
            },
            (Err(err), _) | (_, Err(err)) => {
                warn!(key = %ns_key, error = %err, "dropping change event that failed to parse");
                continue;
            }
        };

        let targets: Vec<WatchCallback> = lock_subscribers(&subscribers).clone();
        for callback in targets {
            callback(parsed.clone(), area);
        }
    }
    debug!(key = %ns_key, "dispatcher finished");
}
