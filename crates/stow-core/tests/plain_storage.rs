use std::sync::Arc;

use serde_json::json;
use stow_core::backend::{Host, MemoryExtension, MemoryWebStorage, StorageArea, WebStorage};
use stow_core::storage::{Storage, StorageEngine, StorageOptions};
use stow_core::StowError;

fn host(extension: &Arc<MemoryExtension>, web: &Arc<MemoryWebStorage>) -> Host {
    Host::detached()
        .with_extension(extension.clone())
        .with_web(web.clone())
}

#[tokio::test]
async fn test_namespace_isolation() {
    let extension = Arc::new(MemoryExtension::new());
    let web = Arc::new(MemoryWebStorage::new());

    let first = Storage::new(host(&extension, &web), StorageOptions::default());
    first.set_namespace("first:");
    let second = Storage::new(host(&extension, &web), StorageOptions::default());
    second.set_namespace("second:");

    first.set("shared", &json!(1)).await.expect("set should succeed");
    second.set("shared", &json!(2)).await.expect("set should succeed");
    second.set("only", &json!(3)).await.expect("set should succeed");

    let first_all = first.get_all().await.expect("get_all should succeed");
    assert_eq!(first_all.len(), 1);
    assert_eq!(first_all.get("shared"), Some(&json!("1")));

    let second_all = second.get_all().await.expect("get_all should succeed");
    assert_eq!(second_all.len(), 2);
    assert_eq!(first.get("shared").await.unwrap(), Some(json!(1)));
    assert_eq!(second.get("shared").await.unwrap(), Some(json!(2)));

    second.remove_all().await.expect("remove_all should succeed");
    assert!(second.get_all().await.unwrap().is_empty());
    assert_eq!(first.get("shared").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn test_secondary_fallback_for_copied_keys() {
    let web = Arc::new(MemoryWebStorage::new());
    let storage = Storage::new(
        Host::detached().with_web(web.clone()),
        StorageOptions::default().copied_keys(["theme"]),
    );

    storage.set("theme", &json!("dark")).await.unwrap();
    storage.set("secret", &json!("hidden")).await.unwrap();

    assert_eq!(web.get_item("theme").as_deref(), Some("\"dark\""));
    assert_eq!(web.get_item("secret"), None);
    assert_eq!(storage.get("theme").await.unwrap(), Some(json!("dark")));
    assert_eq!(storage.get("secret").await.unwrap(), None);
}

#[tokio::test]
async fn test_web_app_mode_uses_secondary_only() {
    let extension = Arc::new(MemoryExtension::new());
    let web = Arc::new(MemoryWebStorage::new());
    let storage = Storage::new(host(&extension, &web).web_app(true), StorageOptions::default());

    assert!(!storage.base().has_extension_api());
    assert!(storage.base().is_copied("anything"));

    storage.set("k", &json!({"x": 1})).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), Some(json!({"x": 1})));
    assert!(extension.store(StorageArea::Sync).unwrap().snapshot().is_empty());

    let all = storage.get_all().await.unwrap();
    assert_eq!(all.get("k"), Some(&json!("{\"x\":1}")));

    storage.remove("k").await.unwrap();
    assert!(web.is_empty());
}

#[tokio::test]
async fn test_copy_then_clear_with_copies() {
    let extension = Arc::new(MemoryExtension::new());
    let web = Arc::new(MemoryWebStorage::new());
    let storage = Storage::new(
        host(&extension, &web),
        StorageOptions::default().all_copied().copied_keys(["a"]),
    );

    extension
        .store(StorageArea::Sync)
        .unwrap()
        .write([("a".to_string(), json!("1")), ("b".to_string(), json!("2"))].into())
        .unwrap();

    assert!(storage.copy(Some("a")).await.unwrap());
    assert_eq!(web.len(), 1);
    assert!(!storage.copy(Some("b")).await.unwrap());
    assert!(storage.copy(None).await.unwrap());
    assert_eq!(web.len(), 2);
    assert!(!storage.copy(None).await.unwrap());

    storage.clear(false).await.unwrap();
    assert!(storage.get_all().await.unwrap().is_empty());
    assert_eq!(web.len(), 2);

    storage.clear(true).await.unwrap();
    assert!(web.is_empty());
}

#[tokio::test]
async fn test_quota_warning_and_rejection() {
    let extension = Arc::new(MemoryExtension::new());
    let sync = extension.store(StorageArea::Sync).unwrap();
    sync.set_quota_bytes(Some(100));
    let storage = Storage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::default(),
    );

    // 72 bytes of JSON text: 72% of quota.
    let warning = storage.set("big", &json!("a".repeat(70))).await.unwrap();
    assert!(warning.is_empty());

    // Stored "big" accounts 79 bytes; 79 + 7 = 86.
    let warning = storage.set("small", &json!("bbbbb")).await.unwrap();
    assert!(
        warning.starts_with("Storage quota is almost full. 86/100"),
        "unexpected warning: {warning}"
    );

    let result = storage.set("huge", &json!("c".repeat(30))).await;
    assert!(matches!(
        result,
        Err(StowError::QuotaExceeded { quota: 100, .. })
    ));
    assert!(!sync.snapshot().contains_key("huge"));
}

#[tokio::test]
async fn test_quota_skipped_without_byte_usage() {
    let extension = Arc::new(MemoryExtension::new());
    let sync = extension.store(StorageArea::Sync).unwrap();
    sync.set_quota_bytes(Some(10));
    sync.set_bytes_in_use_supported(false);
    let storage = Storage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::default(),
    );

    let warning = storage.set("k", &json!("well over ten bytes")).await.unwrap();
    assert!(warning.is_empty());
}

#[tokio::test]
async fn test_managed_area_is_read_only() {
    let extension = Arc::new(MemoryExtension::new());
    extension
        .store(StorageArea::Managed)
        .unwrap()
        .provision([("policy".to_string(), json!("true"))].into())
        .unwrap();
    let storage = Storage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::area(StorageArea::Managed),
    );

    assert_eq!(storage.get("policy").await.unwrap(), Some(json!(true)));
    assert!(matches!(
        storage.set("policy", &json!(false)).await,
        Err(StowError::ReadOnlyArea(_))
    ));
}

#[tokio::test]
async fn test_legacy_callback_backend() {
    let extension = Arc::new(MemoryExtension::legacy());
    extension
        .store(StorageArea::Sync)
        .unwrap()
        .set_quota_bytes(Some(50));
    let storage = Storage::new(
        Host::detached().with_extension(extension.clone()),
        StorageOptions::default(),
    );

    storage.set("k", &json!([1, 2, 3])).await.unwrap();
    assert_eq!(storage.get("k").await.unwrap(), Some(json!([1, 2, 3])));
    assert!(matches!(
        storage.set("long", &json!("x".repeat(60))).await,
        Err(StowError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn test_detached_host_is_harmless() {
    let storage = Storage::new(Host::detached(), StorageOptions::default());
    assert_eq!(storage.set("k", &json!(1)).await.unwrap(), "");
    assert_eq!(storage.get("k").await.unwrap(), None);
    storage.remove("k").await.unwrap();
    storage.remove_all().await.unwrap();
    assert!(!storage.watch(&Default::default()));
}
