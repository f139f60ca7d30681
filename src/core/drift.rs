//! Drift detection against the baseline full snapshot.

use crate::error::Error;
use crate::models::{Snapshot, FULL_SECTION};
use crate::services::alerts::{AlertSink, DRIFT_DETECTED};
use crate::storage::Database;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Result of one drift check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftOutcome {
    /// No baseline is marked for the device.
    NoBaseline,
    /// Nothing changed since the last check.
    Unchanged,
    /// The device was flagged by this check.
    Detected,
    /// The flag was cleared by this check.
    Resolved,
}

/// Compares each device's latest full snapshot with its baseline.
pub struct DriftDetector {
    db: Arc<Database>,
    alerts: Arc<dyn AlertSink>,
}

impl DriftDetector {
    pub fn new(db: Arc<Database>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { db, alerts }
    }

    /// Check one device. Repeated calls without a new snapshot change nothing.
    pub async fn check(&self, device_id: Uuid) -> Result<DriftOutcome> {
        let (outcome, device_name, baseline, latest) = self
            .db
            .transaction(|state| {
                let baseline = state
                    .snapshots
                    .iter()
                    .filter(|s| s.device_id == device_id && s.section == FULL_SECTION && s.is_baseline)
                    .max_by_key(|s| s.version)
                    .cloned();
                let latest = state.latest_snapshot(device_id, FULL_SECTION).cloned();
                let device = state
                    .device_mut(device_id)
                    .ok_or_else(|| Error::not_found("Device", device_id))?;
                let name = device.name.clone();

                let (Some(baseline), Some(latest)) = (baseline, latest) else {
                    return Ok((DriftOutcome::NoBaseline, name, None, None));
                };
                if baseline.id == latest.id {
                    return Ok((DriftOutcome::Unchanged, name, None, None));
                }

                let outcome = match (baseline.checksum == latest.checksum, device.drift_detected) {
                    (false, false) => {
                        device.drift_detected = true;
                        device.drift_detected_at = Some(Utc::now());
                        DriftOutcome::Detected
                    }
                    (true, true) => {
                        device.drift_detected = false;
                        device.drift_detected_at = None;
                        DriftOutcome::Resolved
                    }
                    _ => DriftOutcome::Unchanged,
                };
                Ok((outcome, name, Some(baseline), Some(latest)))
            })
            .await?;

        match outcome {
            DriftOutcome::Detected => {
                if let (Some(baseline), Some(latest)) = (baseline, latest) {
                    self.fire(device_id, &device_name, &baseline, &latest);
                }
            }
            DriftOutcome::Resolved => {
                tracing::info!("Drift resolved on {}", device_name);
            }
            DriftOutcome::NoBaseline => {
                tracing::debug!("No baseline for {}, skipping drift check", device_name);
            }
            DriftOutcome::Unchanged => {}
        }

        Ok(outcome)
    }

    /// Check every device. Per-device failures are logged.
    pub async fn check_all(&self) -> Vec<(Uuid, DriftOutcome)> {
        let ids: Vec<Uuid> = self
            .db
            .read(|s| s.devices.iter().map(|d| d.id).collect())
            .await;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.check(id).await {
                Ok(outcome) => results.push((id, outcome)),
                Err(e) => tracing::error!("Drift check for {} failed: {}", id, e),
            }
        }
        results
    }

    fn fire(&self, device_id: Uuid, device_name: &str, baseline: &Snapshot, latest: &Snapshot) {
        tracing::warn!(
            "Drift detected on {}: baseline v{} -> latest v{}",
            device_name,
            baseline.version,
            latest.version
        );
        self.alerts.fire(
            DRIFT_DETECTED,
            json!({
                "device_id": device_id,
                "device_name": device_name,
                "baseline_checksum": baseline.checksum,
                "latest_checksum": latest.checksum,
                "detected_at": Utc::now().to_rfc3339(),
            }),
        );
    }
}
