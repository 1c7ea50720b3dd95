use std::sync::Arc;

use serde_json::json;
use stow_core::backend::{ChangeSource, Host, MemoryExtension, MemoryWebStorage, StorageArea};
use stow_core::storage::{CallbackMap, Storage, StorageEngine, StorageOptions, WatchCallback};
use tokio::sync::mpsc;

fn storage(extension: &Arc<MemoryExtension>, area: StorageArea) -> Storage {
    Storage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::area(area),
    )
}

fn forwarding() -> (WatchCallback, mpsc::UnboundedReceiver<serde_json::Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: WatchCallback = Arc::new(move |change, _| {
        if let Some(value) = change.new_value {
            let _ = tx.send(value);
        }
    });
    (callback, rx)
}

fn single(key: &str, callback: &WatchCallback) -> CallbackMap {
    [(key.to_string(), Arc::clone(callback))].into()
}

#[tokio::test]
async fn test_one_native_listener_per_key() {
    let extension = Arc::new(MemoryExtension::new());
    let events = extension.events();
    let storage = storage(&extension, StorageArea::Local);
    let (first, _first_rx) = forwarding();
    let (second, _second_rx) = forwarding();

    assert!(storage.watch(&single("k", &first)));
    assert!(storage.watch(&single("k", &first)));
    assert_eq!(events.listener_count(), 1);

    assert!(storage.watch(&single("k", &second)));
    assert_eq!(events.listener_count(), 1);
    assert_eq!(storage.base().watch_registry().subscriber_count("k"), 2);

    storage.unwatch(&single("k", &first));
    assert_eq!(events.listener_count(), 1);

    storage.unwatch(&single("k", &second));
    assert_eq!(events.listener_count(), 0);
    assert_eq!(storage.base().watch_registry().registration_count(), 0);
}

#[tokio::test]
async fn test_changes_arrive_in_write_order() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = storage(&extension, StorageArea::Local);
    let (callback, mut rx) = forwarding();
    storage.watch(&single("k", &callback));

    for value in ["a", "b", "c"] {
        storage.set("k", &json!(value)).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv().await.expect("change event"));
    }
    assert_eq!(seen, vec![json!("a"), json!("b"), json!("c")]);
}

#[tokio::test]
async fn test_all_subscribers_receive_parsed_values() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = storage(&extension, StorageArea::Sync);
    let (first, mut first_rx) = forwarding();
    let (second, mut second_rx) = forwarding();
    storage.watch(&single("k", &first));
    storage.watch(&single("k", &second));

    storage.set("k", &json!({"n": 1})).await.unwrap();
    assert_eq!(first_rx.recv().await, Some(json!({"n": 1})));
    assert_eq!(second_rx.recv().await, Some(json!({"n": 1})));
}

#[tokio::test]
async fn test_other_areas_and_keys_are_ignored() {
    let extension = Arc::new(MemoryExtension::new());
    let local = storage(&extension, StorageArea::Local);
    let sync = storage(&extension, StorageArea::Sync);
    let (callback, mut rx) = forwarding();
    local.watch(&single("k", &callback));

    sync.set("k", &json!("sync")).await.unwrap();
    local.set("other", &json!("other")).await.unwrap();
    local.set("k", &json!("local")).await.unwrap();

    assert_eq!(rx.recv().await, Some(json!("local")));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unwatch_all_tears_down() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = storage(&extension, StorageArea::Local);
    let (callback, _rx) = forwarding();
    storage.watch(&single("a", &callback));
    storage.watch(&single("b", &callback));
    assert_eq!(extension.events().listener_count(), 2);

    assert!(storage.unwatch_all());
    assert_eq!(extension.events().listener_count(), 0);
}

#[tokio::test]
async fn test_watch_unsupported_cases() {
    let extension = Arc::new(MemoryExtension::new());
    let (callback, _rx) = forwarding();

    let managed = storage(&extension, StorageArea::Managed);
    assert!(!managed.watch(&single("k", &callback)));

    let web_app = Storage::new(
        Host::detached()
            .with_extension(extension.clone())
            .with_web(Arc::new(MemoryWebStorage::new()))
            .web_app(true),
        StorageOptions::default(),
    );
    assert!(!web_app.watch(&single("k", &callback)));
    assert_eq!(extension.events().listener_count(), 0);
}

#[test]
fn test_watch_outside_runtime_is_refused() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = storage(&extension, StorageArea::Local);
    let (callback, _rx) = forwarding();
    assert!(!storage.watch(&single("k", &callback)));
}

#[tokio::test]
async fn test_dropping_engine_releases_listeners() {
    let extension = Arc::new(MemoryExtension::new());
    {
        let storage = storage(&extension, StorageArea::Local);
        let (callback, _rx) = forwarding();
        storage.watch(&single("k", &callback));
        assert_eq!(extension.events().listener_count(), 1);
    }
    assert_eq!(extension.events().listener_count(), 0);
}
