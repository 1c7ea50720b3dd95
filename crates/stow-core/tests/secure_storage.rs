use std::sync::Arc;

use serde_json::{json, Value};
use stow_core::backend::{ChangeSource, Host, MemoryExtension, StorageArea};
use stow_core::storage::{
    CallbackMap, SecureOptions, SecureStorage, StorageEngine, StorageOptions, WatchCallback,
};
use stow_core::StowError;

fn fast() -> SecureOptions {
    SecureOptions::default().iterations(1_000)
}

fn secure(extension: &Arc<MemoryExtension>, password: &str, options: SecureOptions) -> SecureStorage {
    let storage = SecureStorage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::area(StorageArea::Local),
    );
    storage
        .set_password(password, options)
        .expect("set_password should succeed");
    storage
}

#[tokio::test]
async fn test_round_trip_json_values() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = secure(&extension, "correct-horse", fast());

    let samples = [
        json!(null),
        json!(true),
        json!(-17.5),
        json!("ünïcødé 𝌆"),
        json!([1, "two", {"three": 3}]),
        json!({"nested": {"list": [], "empty": ""}}),
    ];
    for (index, value) in samples.iter().enumerate() {
        let key = format!("k{index}");
        storage.set(&key, value).await.expect("set should succeed");
        assert_eq!(storage.get(&key).await.unwrap().as_ref(), Some(value));
    }
}

#[tokio::test]
async fn test_second_password_never_sees_plaintext() {
    let extension = Arc::new(MemoryExtension::new());
    let first = secure(&extension, "p1", fast());
    first.set("token", &json!("abc")).await.unwrap();
    assert_eq!(first.get("token").await.unwrap(), Some(json!("abc")));

    let second = secure(&extension, "p2", fast());
    assert_ne!(first.base().namespace(), second.base().namespace());
    assert_eq!(second.get("token").await.unwrap(), None);
    assert!(second.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_password_is_usable() {
    let extension = Arc::new(MemoryExtension::new());
    let empty = secure(&extension, "", fast());
    empty.set("k", &json!({"v": 1})).await.unwrap();
    assert_eq!(empty.get("k").await.unwrap(), Some(json!({"v": 1})));

    let other = secure(&extension, "not-empty", fast());
    assert_eq!(other.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_wrong_password_in_shared_namespace_fails() {
    let extension = Arc::new(MemoryExtension::new());
    let first = secure(&extension, "p1", fast().namespace("vault"));
    first.set("token", &json!("abc")).await.unwrap();

    let second = secure(&extension, "p2", fast().namespace("vault"));
    let result = second.get("token").await;
    assert!(
        matches!(result, Err(StowError::DecryptionFailed)),
        "expected decryption failure, got {result:?}"
    );
}

#[tokio::test]
async fn test_migrate_rekeys_every_entry() {
    let extension = Arc::new(MemoryExtension::new());
    let old = secure(&extension, "old-password", fast());
    old.set("a", &json!(1)).await.unwrap();
    old.set("b", &json!({"x": "y"})).await.unwrap();

    let new = secure(&extension, "new-password", fast());
    assert_eq!(old.migrate(&new).await.expect("migrate should succeed"), 2);
    assert_eq!(new.get("a").await.unwrap(), Some(json!(1)));
    assert_eq!(new.get("b").await.unwrap(), Some(json!({"x": "y"})));

    // Running it again overwrites with fresh envelopes.
    assert_eq!(old.migrate(&new).await.unwrap(), 2);
    assert_eq!(new.get_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_iv_sizes_are_interchangeable_per_instance() {
    let extension = Arc::new(MemoryExtension::new());
    for iv_size in [12, 16, 32] {
        let options = SecureOptions {
            iv_size,
            ..fast().namespace(format!("iv{iv_size}"))
        };
        let storage = secure(&extension, "pw", options);
        storage.set("k", &json!(iv_size)).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(Value::from(iv_size)));
    }
}

#[tokio::test]
async fn test_secure_watch_delivers_decrypted_values() {
    let extension = Arc::new(MemoryExtension::new());
    let storage = secure(&extension, "p1", fast());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: WatchCallback = Arc::new(move |change, _| {
        let _ = tx.send(change);
    });
    let callbacks: CallbackMap = [("token".to_string(), callback)].into();
    assert!(storage.watch(&callbacks));

    storage.set("token", &json!("first")).await.unwrap();
    storage.set("token", &json!("second")).await.unwrap();

    let change = rx.recv().await.expect("first change");
    assert_eq!(change.old_value, None);
    assert_eq!(change.new_value, Some(json!("first")));
    let change = rx.recv().await.expect("second change");
    assert_eq!(change.old_value, Some(json!("first")));
    assert_eq!(change.new_value, Some(json!("second")));

    assert!(storage.unwatch(&callbacks));
    assert_eq!(extension.events().listener_count(), 0);
}
