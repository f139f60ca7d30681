//! Backup, restore and scheduled auto-backup.

use crate::core::snapshots::SnapshotStore;
use crate::error::Error;
use crate::models::{ConfigTree, Device, Snapshot, SnapshotTrigger, FULL_SECTION};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::device::ClientRegistry;
use crate::storage::Database;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    /// Safety snapshot of the configuration that was replaced.
    pub pre_restore_snapshot_id: Uuid,
    /// Snapshot of the uploaded configuration, for uploads only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<Uuid>,
    pub message: String,
}

/// What a scheduled backup check did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupReport {
    pub backed_up: Vec<Uuid>,
    pub failed: usize,
}

/// Pulls full configurations into snapshots and pushes them back.
pub struct BackupService {
    db: Arc<Database>,
    snapshots: SnapshotStore,
    clients: Arc<ClientRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl BackupService {
    pub fn new(
        db: Arc<Database>,
        clients: Arc<ClientRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&db)),
            db,
            clients,
            audit,
        }
    }

    async fn device(&self, device_id: Uuid) -> Result<Device> {
        self.db
            .read(|s| s.device(device_id).cloned())
            .await
            .ok_or_else(|| Error::not_found("Device", device_id))
    }

    /// Fetch the full configuration of a device and store it.
    pub async fn sync(
        &self,
        device_id: Uuid,
        trigger: SnapshotTrigger,
        label: Option<&str>,
        actor: &str,
    ) -> Result<Snapshot> {
        let device = self.device(device_id).await?;
        let client = self.clients.client_for(&device)?;

        let config = match client.fetch(&device, FULL_SECTION).await {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Backup of {} failed: {}", device.name, e);
                self.audit.record(
                    AuditEvent::new("trigger_backup_failed", actor, "device", device_id)
                        .with_response(json!({"error": e.to_string()})),
                );
                return Err(e);
            }
        };

        let snapshot = self
            .snapshots
            .create(device_id, FULL_SECTION, config, trigger, label)
            .await?;

        if trigger == SnapshotTrigger::Schedule {
            let taken_at = snapshot.created_at;
            self.db
                .transaction(|state| {
                    if let Some(device) = state.device_mut(device_id) {
                        device.backup.last_auto_backup = Some(taken_at);
                    }
                    Ok(())
                })
                .await?;
        }

        tracing::info!("Backed up {} as v{}", device.name, snapshot.version);
        self.audit.record(
            AuditEvent::new("trigger_backup", actor, "device", device_id).with_response(json!({
                "snapshot_id": snapshot.id,
                "version": snapshot.version,
                "trigger": snapshot.trigger,
            })),
        );
        Ok(snapshot)
    }

    /// Push a stored snapshot back to its device, or to another device.
    ///
    /// The live configuration is saved as a `pre_restore` snapshot first.
    pub async fn restore(
        &self,
        snapshot_id: Uuid,
        target_device: Option<Uuid>,
        actor: &str,
    ) -> Result<RestoreOutcome> {
        let snapshot = self.snapshots.get(snapshot_id).await?;
        let device = self
            .device(target_device.unwrap_or(snapshot.device_id))
            .await?;
        let client = self.clients.client_for(&device)?;

        let live = client.fetch(&device, FULL_SECTION).await?;
        let full = if snapshot.section == FULL_SECTION {
            snapshot.data.clone()
        } else {
            let mut merged = live.clone();
            match merged.as_object_mut() {
                Some(map) => {
                    map.insert(snapshot.section.clone(), snapshot.data.clone());
                }
                None => {
                    return Err(Error::Device(format!(
                        "{} returned a non-object configuration",
                        device.name
                    )))
                }
            }
            merged
        };

        let label = format!("before restore of v{}", snapshot.version);
        let pre = self
            .snapshots
            .create(
                device.id,
                FULL_SECTION,
                live,
                SnapshotTrigger::PreRestore,
                Some(label.as_str()),
            )
            .await?;

        let result = client.restore(&device, &full).await?;
        if !result.success {
            self.audit.record(
                AuditEvent::new("restore_backup_failed", actor, "device", device.id)
                    .with_request(json!({"snapshot_id": snapshot_id}))
                    .with_response(json!({"error": result.message})),
            );
            return Err(Error::Device(format!(
                "Restore on {} failed: {}",
                device.name, result.message
            )));
        }

        tracing::info!(
            "Restored {} v{} onto {}",
            snapshot.section,
            snapshot.version,
            device.name
        );
        self.audit.record(
            AuditEvent::new("restore_backup", actor, "device", device.id)
                .with_request(json!({"snapshot_id": snapshot_id}))
                .with_response(json!({"pre_restore_snapshot_id": pre.id})),
        );
        Ok(RestoreOutcome {
            pre_restore_snapshot_id: pre.id,
            snapshot_id: None,
            message: result.message,
        })
    }

    /// Push an uploaded full configuration and keep it as a snapshot.
    ///
    /// A failure to store the uploaded snapshot after a successful push is
    /// logged and reported as `snapshot_id: None`.
    pub async fn upload_restore(
        &self,
        device_id: Uuid,
        config: ConfigTree,
        label: Option<&str>,
        actor: &str,
    ) -> Result<RestoreOutcome> {
        if !config.is_object() {
            return Err(Error::InvalidArgument(
                "uploaded configuration must be an object".to_string(),
            ));
        }

        let device = self.device(device_id).await?;
        let client = self.clients.client_for(&device)?;

        let live = client.fetch(&device, FULL_SECTION).await?;
        let pre = self
            .snapshots
            .create(
                device_id,
                FULL_SECTION,
                live,
                SnapshotTrigger::PreRestore,
                Some("before upload restore"),
            )
            .await?;

        let result = client.restore(&device, &config).await?;
        if !result.success {
            self.audit.record(
                AuditEvent::new("upload_restore_failed", actor, "device", device_id)
                    .with_response(json!({"error": result.message})),
            );
            return Err(Error::Device(format!(
                "Upload restore on {} failed: {}",
                device.name, result.message
            )));
        }

        let label = label.unwrap_or("uploaded configuration");
        let snapshot_id = match self
            .snapshots
            .create(device_id, FULL_SECTION, config, SnapshotTrigger::Upload, Some(label))
            .await
        {
            Ok(snapshot) => Some(snapshot.id),
            Err(e) => {
                tracing::warn!("Uploaded configuration applied but not stored: {}", e);
                None
            }
        };

        self.audit.record(
            AuditEvent::new("upload_restore", actor, "device", device_id).with_response(json!({
                "pre_restore_snapshot_id": pre.id,
                "snapshot_id": snapshot_id,
            })),
        );
        Ok(RestoreOutcome {
            pre_restore_snapshot_id: pre.id,
            snapshot_id,
            message: result.message,
        })
    }

    /// Back up every device whose auto-backup interval has elapsed.
    pub async fn scheduled_check(&self, now: DateTime<Utc>) -> BackupReport {
        let due: Vec<Uuid> = self
            .db
            .read(|s| {
                s.devices
                    .iter()
                    .filter(|d| is_backup_due(d, now))
                    .map(|d| d.id)
                    .collect()
            })
            .await;

        let mut report = BackupReport::default();
        for device_id in due {
            match self
                .sync(device_id, SnapshotTrigger::Schedule, None, "scheduler")
                .await
            {
                Ok(_) => report.backed_up.push(device_id),
                Err(e) => {
                    tracing::error!("Scheduled backup of {} failed: {}", device_id, e);
                    report.failed += 1;
                }
            }
        }

        if !report.backed_up.is_empty() || report.failed > 0 {
            tracing::info!(
                "Scheduled backups: {} taken, {} failed",
                report.backed_up.len(),
                report.failed
            );
        }
        report
    }
}

/// Whether a device's automatic backup is due at `now`.
pub fn is_backup_due(device: &Device, now: DateTime<Utc>) -> bool {
    if !device.backup.auto_backup_enabled {
        return false;
    }
    match device.backup.last_auto_backup {
        None => true,
        Some(last) => now - last >= Duration::hours(i64::from(device.backup.interval_hours)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_due() {
        let now = Utc::now();
        let mut device = Device::new("fw", "mock", "10.0.0.1", 443);
        assert!(!is_backup_due(&device, now));

        device.backup.auto_backup_enabled = true;
        assert!(is_backup_due(&device, now));

        device.backup.last_auto_backup = Some(now - Duration::hours(23));
        assert!(!is_backup_due(&device, now));

        device.backup.last_auto_backup = Some(now - Duration::hours(24));
        assert!(is_backup_due(&device, now));
    }
}
