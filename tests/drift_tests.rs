//! Integration tests for drift detection.

mod common;

use common::fleet;
use fleet_orchestrator::core::{DriftDetector, DriftOutcome};
use fleet_orchestrator::models::{SnapshotTrigger, FULL_SECTION};
use fleet_orchestrator::services::alerts::DRIFT_DETECTED;
use serde_json::json;
use std::sync::Arc;

fn config(hostname: &str) -> serde_json::Value {
    json!({"system": {"hostname": hostname}, "ntp": {"servers": ["pool.ntp.org"]}})
}

// ========== DETECTION TESTS ==========

#[tokio::test]
async fn test_no_baseline_is_skipped() {
    let f = fleet(1).await;
    let detector = DriftDetector::new(Arc::clone(&f.db), f.alerts.clone());
    let store = f.orchestrator.snapshots();
    store
        .create(f.devices[0].id, FULL_SECTION, config("a"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();

    assert_eq!(
        detector.check(f.devices[0].id).await.unwrap(),
        DriftOutcome::NoBaseline
    );
    assert!(f.alerts.events().is_empty());
}

#[tokio::test]
async fn test_drift_detected_once_and_resolved() {
    let f = fleet(1).await;
    let id = f.devices[0].id;
    let detector = DriftDetector::new(Arc::clone(&f.db), f.alerts.clone());
    let store = f.orchestrator.snapshots();

    let base = store
        .create(id, FULL_SECTION, config("a"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    store.set_baseline(base.id).await.unwrap();
    assert_eq!(detector.check(id).await.unwrap(), DriftOutcome::Unchanged);

    let drifted = store
        .create(id, FULL_SECTION, config("b"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    assert_eq!(detector.check(id).await.unwrap(), DriftOutcome::Detected);
    assert_eq!(detector.check(id).await.unwrap(), DriftOutcome::Unchanged);
    assert_eq!(f.alerts.count(DRIFT_DETECTED), 1);

    let (_, payload) = &f.alerts.events()[0];
    assert_eq!(payload["device_name"], json!("fw-1"));
    assert_eq!(payload["baseline_checksum"], json!(base.checksum));
    assert_eq!(payload["latest_checksum"], json!(drifted.checksum));

    let device = f.db.read(|s| s.device(id).cloned()).await.unwrap();
    assert!(device.drift_detected);
    assert!(device.drift_detected_at.is_some());

    store
        .create(id, FULL_SECTION, config("a"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    assert_eq!(detector.check(id).await.unwrap(), DriftOutcome::Resolved);
    assert_eq!(f.alerts.count(DRIFT_DETECTED), 1);

    let device = f.db.read(|s| s.device(id).cloned()).await.unwrap();
    assert!(!device.drift_detected);
    assert!(device.drift_detected_at.is_none());
}

#[tokio::test]
async fn test_section_snapshots_do_not_count() {
    let f = fleet(1).await;
    let id = f.devices[0].id;
    let detector = DriftDetector::new(Arc::clone(&f.db), f.alerts.clone());
    let store = f.orchestrator.snapshots();

    let base = store
        .create(id, FULL_SECTION, config("a"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    store.set_baseline(base.id).await.unwrap();
    store
        .create(id, "ntp", json!({"servers": []}), SnapshotTrigger::BulkApply, None)
        .await
        .unwrap();

    assert_eq!(detector.check(id).await.unwrap(), DriftOutcome::Unchanged);
    assert!(f.alerts.events().is_empty());
}

#[tokio::test]
async fn test_check_all_covers_every_device() {
    let f = fleet(3).await;
    let detector = DriftDetector::new(Arc::clone(&f.db), f.alerts.clone());
    let store = f.orchestrator.snapshots();

    let first = f.devices[0].id;
    let base = store
        .create(first, FULL_SECTION, config("a"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();
    store.set_baseline(base.id).await.unwrap();
    store
        .create(first, FULL_SECTION, config("changed"), SnapshotTrigger::Sync, None)
        .await
        .unwrap();

    let results = detector.check_all().await;
    assert_eq!(results.len(), 3);
    assert!(results.contains(&(first, DriftOutcome::Detected)));
    assert_eq!(
        results
            .iter()
            .filter(|(_, o)| *o == DriftOutcome::NoBaseline)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_unknown_device_is_not_found() {
    let f = fleet(0).await;
    let detector = DriftDetector::new(Arc::clone(&f.db), f.alerts.clone());
    let err = detector.check(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}
