//! Integration tests for the snapshot store.
//!
//! Tests cover:
//! - Version sequencing per device and section
//! - Retention trimming
//! - Persistence across reopen
//! - Concurrent creates

use fleet_orchestrator::core::SnapshotStore;
use fleet_orchestrator::models::{Device, SnapshotTrigger, FULL_SECTION};
use fleet_orchestrator::storage::Database;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

async fn store_with_device(db: Arc<Database>, retention: Option<usize>) -> (SnapshotStore, Device) {
    let mut device = Device::new("edge-fw", "mock", "192.0.2.10", 443);
    device.backup.retention = retention;
    let stored = device.clone();
    db.transaction(|state| {
        state.devices.push(stored);
        Ok(())
    })
    .await
    .unwrap();
    (SnapshotStore::new(db), device)
}

// ========== VERSION TESTS ==========

#[tokio::test]
async fn test_versions_are_per_section() {
    let (store, device) = store_with_device(Arc::new(Database::in_memory()), None).await;

    for expected in 1..=3 {
        let snap = store
            .create(device.id, "ntp", json!({"rev": expected}), SnapshotTrigger::Manual, None)
            .await
            .unwrap();
        assert_eq!(snap.version, expected);
    }
    let full = store
        .create(device.id, FULL_SECTION, json!({}), SnapshotTrigger::Sync, Some("first sync"))
        .await
        .unwrap();
    assert_eq!(full.version, 1);
    assert_eq!(full.label.as_deref(), Some("first sync"));

    let listed = store.list(device.id, Some("ntp"), 10, 0).await;
    let versions: Vec<u32> = listed.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![3, 2, 1]);

    let page = store.list(device.id, None, 2, 1).await;
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_identical_data_has_identical_checksum() {
    let (store, device) = store_with_device(Arc::new(Database::in_memory()), None).await;

    let a = store
        .create(device.id, "dns", json!({"a": 1, "b": [1, 2]}), SnapshotTrigger::Manual, None)
        .await
        .unwrap();
    let b = store
        .create(device.id, "dns", json!({"b": [1, 2], "a": 1}), SnapshotTrigger::Manual, None)
        .await
        .unwrap();
    let c = store
        .create(device.id, "dns", json!({"a": 1, "b": [2, 1]}), SnapshotTrigger::Manual, None)
        .await
        .unwrap();

    assert_eq!(a.checksum, b.checksum);
    assert_ne!(a.checksum, c.checksum);
}

// ========== RETENTION TESTS ==========

#[tokio::test]
async fn test_retention_keeps_newest() {
    let (store, device) = store_with_device(Arc::new(Database::in_memory()), Some(3)).await;

    for i in 0..5 {
        store
            .create(device.id, FULL_SECTION, json!({"rev": i}), SnapshotTrigger::Sync, None)
            .await
            .unwrap();
    }

    let listed = store.list(device.id, None, 100, 0).await;
    let versions: Vec<u32> = listed.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![5, 4, 3]);

    // Trimmed versions are never handed out again.
    let next = store
        .create(device.id, FULL_SECTION, json!({"rev": 5}), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    assert_eq!(next.version, 6);
}

#[tokio::test]
async fn test_enforce_retention_explicitly() {
    let (store, device) = store_with_device(Arc::new(Database::in_memory()), None).await;
    for i in 0..4 {
        store
            .create(device.id, "ntp", json!({"rev": i}), SnapshotTrigger::Manual, None)
            .await
            .unwrap();
    }

    assert_eq!(store.enforce_retention(device.id, 1).await.unwrap(), 3);
    assert_eq!(store.enforce_retention(device.id, 1).await.unwrap(), 0);
    assert!(store.enforce_retention(device.id, 0).await.is_err());
    assert_eq!(store.latest(device.id, "ntp").await.unwrap().version, 4);
}

// ========== PERSISTENCE TESTS ==========

#[tokio::test]
async fn test_snapshots_survive_reopen() {
    let temp = TempDir::new().unwrap();

    let (snap_id, device_id) = {
        let db = Arc::new(Database::open(temp.path()).unwrap());
        let (store, device) = store_with_device(db, None).await;
        let snap = store
            .create(device.id, FULL_SECTION, json!({"k": "v"}), SnapshotTrigger::Manual, None)
            .await
            .unwrap();
        store.set_baseline(snap.id).await.unwrap();
        (snap.id, device.id)
    };

    let reopened = SnapshotStore::new(Arc::new(Database::open(temp.path()).unwrap()));
    let snap = reopened.get(snap_id).await.unwrap();
    assert_eq!(snap.data, json!({"k": "v"}));
    assert!(snap.is_baseline);
    assert_eq!(
        reopened.baseline(device_id, FULL_SECTION).await.unwrap().id,
        snap_id
    );

    let next = reopened
        .create(device_id, FULL_SECTION, json!({}), SnapshotTrigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(next.version, 2);
}

// ========== CONCURRENCY TESTS ==========

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_versions() {
    let (store, device) = store_with_device(Arc::new(Database::in_memory()), None).await;
    let n = 20u32;

    let mut handles = Vec::new();
    for i in 0..n {
        let store = store.clone();
        let device_id = device.id;
        handles.push(tokio::spawn(async move {
            store
                .create(device_id, "ntp", json!({"writer": i}), SnapshotTrigger::Manual, None)
                .await
                .unwrap()
                .version
        }));
    }

    let mut versions = BTreeSet::new();
    for handle in handles {
        versions.insert(handle.await.unwrap());
    }
    assert_eq!(versions, (1..=n).collect::<BTreeSet<u32>>());
}
