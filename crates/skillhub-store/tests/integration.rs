//! Integration tests for the skillhub-store crate.
//!
//! These exercise the local store against a real SQLite file on disk (via
//! tempfile): durability across reopen, the reset flag, and the full
//! contract suite.

use skillhub_store::conformance::{self, sample_user};
use skillhub_store::{BackendKind, LocalStore, LocalStoreConfig, Storage, StorageError};

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn contract_suite_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(LocalStoreConfig::at(dir.path().join("skillhub.db")));
    store.initialize().await.unwrap();

    assert_eq!(store.backend(), BackendKind::Local);
    conformance::run_all(&store).await;
}

#[tokio::test]
async fn data_survives_reopen_without_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.db");

    let user_id = {
        let store = LocalStore::new(LocalStoreConfig::at(&path));
        let user = store
            .create_user(sample_user("durable@x.com", "Durable"))
            .await
            .unwrap();
        store.add_technology(&user.id, "Rust").await.unwrap();
        user.id
    };

    let reopened = LocalStore::new(LocalStoreConfig::at(&path));
    reopened.initialize().await.unwrap();

    let user = reopened.get_user_by_id(&user_id).await.unwrap().unwrap();
    assert_eq!(user.email, "durable@x.com");
    assert_eq!(user.technologies, vec!["Rust".to_string()]);
}

#[tokio::test]
async fn reset_on_init_wipes_previous_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiped.db");

    {
        let store = LocalStore::new(LocalStoreConfig::at(&path));
        store
            .create_user(sample_user("gone@x.com", "Gone"))
            .await
            .unwrap();
    }

    let store = LocalStore::new(LocalStoreConfig::at(&path).with_reset_on_init(true));
    store.initialize().await.unwrap();

    assert!(store.get_all_users().await.unwrap().is_empty());
    assert!(
        store
            .get_user_by_email("gone@x.com")
            .await
            .unwrap()
            .is_none()
    );

    // The reset only happens once per store; new writes stay.
    let kept = store
        .create_user(sample_user("kept@x.com", "Kept"))
        .await
        .unwrap();
    store.initialize().await.unwrap();
    assert!(store.get_user_by_id(&kept.id).await.unwrap().is_some());
}

#[tokio::test]
async fn unopenable_path_is_a_connectivity_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the database file should be.
    let path = dir.path().join("occupied");
    std::fs::create_dir(&path).unwrap();

    let store = LocalStore::new(LocalStoreConfig::at(&path));
    let err = store.initialize().await.unwrap_err();
    assert!(
        matches!(err, StorageError::Connectivity(_)),
        "expected Connectivity, got: {err}"
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn concurrent_creates_share_one_handle() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(LocalStore::new(LocalStoreConfig::at(
        dir.path().join("concurrent.db"),
    )));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .create_user(sample_user(&format!("c{i}@x.com"), "C"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.get_all_users().await.unwrap().len(), 10);
}
