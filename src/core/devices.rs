//! Managed device registry.

use crate::error::Error;
use crate::models::{BackupSettings, Device};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::storage::Database;
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct DeviceRegistry {
    db: Arc<Database>,
    audit: Arc<dyn AuditSink>,
}

impl DeviceRegistry {
    pub fn new(db: Arc<Database>, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Register a device. Names are unique.
    pub async fn add(&self, device: Device, actor: &str) -> Result<Device> {
        if device.name.trim().is_empty() {
            return Err(Error::InvalidArgument("device name must not be empty".to_string()));
        }

        let stored = device.clone();
        self.db
            .transaction(move |state| {
                if state.devices.iter().any(|d| d.name == stored.name) {
                    return Err(Error::InvalidArgument(format!(
                        "device '{}' already exists",
                        stored.name
                    )));
                }
                state.devices.push(stored);
                Ok(())
            })
            .await?;

        tracing::info!("Device {} added ({} at {})", device.name, device.adapter, device.mgmt_ip);
        self.audit.record(
            AuditEvent::new("create_device", actor, "device", device.id).with_request(json!({
                "name": device.name,
                "adapter": device.adapter,
                "mgmt_ip": device.mgmt_ip,
            })),
        );
        Ok(device)
    }

    pub async fn list(&self) -> Vec<Device> {
        self.db.read(|s| s.devices.clone()).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Device> {
        self.db
            .read(|s| s.device(id).cloned())
            .await
            .ok_or_else(|| Error::not_found("Device", id))
    }

    /// Look a device up by id or by name.
    pub async fn resolve(&self, key: &str) -> Result<Device> {
        if let Ok(id) = Uuid::parse_str(key) {
            return self.get(id).await;
        }
        self.db
            .read(|s| s.devices.iter().find(|d| d.name == key).cloned())
            .await
            .ok_or_else(|| Error::not_found("Device", key))
    }

    /// Replace the backup settings of a device.
    pub async fn update_backup(&self, id: Uuid, settings: BackupSettings, actor: &str) -> Result<Device> {
        if settings.retention == Some(0) {
            return Err(Error::InvalidArgument(
                "retention must keep at least one snapshot".to_string(),
            ));
        }

        let request = serde_json::to_value(&settings)?;
        let device = self
            .db
            .transaction(|state| {
                let device = state
                    .device_mut(id)
                    .ok_or_else(|| Error::not_found("Device", id))?;
                device.backup = settings;
                Ok(device.clone())
            })
            .await?;

        self.audit.record(
            AuditEvent::new("update_backup_settings", actor, "device", id).with_request(request),
        );
        Ok(device)
    }

    /// Remove a device and all of its snapshots.
    pub async fn remove(&self, id: Uuid, actor: &str) -> Result<usize> {
        let (name, removed) = self
            .db
            .transaction(|state| {
                let name = state
                    .device(id)
                    .ok_or_else(|| Error::not_found("Device", id))?
                    .name
                    .clone();
                state.devices.retain(|d| d.id != id);
                let before = state.snapshots.len();
                state.snapshots.retain(|s| s.device_id != id);
                let prefix = format!("{}/", id);
                state.sequences.retain(|key, _| !key.starts_with(&prefix));
                Ok((name, before - state.snapshots.len()))
            })
            .await?;

        tracing::info!("Device {} removed with {} snapshots", name, removed);
        self.audit.record(AuditEvent::new("delete_device", actor, "device", id));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotTrigger;
    use crate::services::TracingAuditSink;
    use crate::core::snapshots::SnapshotStore;

    #[tokio::test]
    async fn test_remove_cascades_snapshots() {
        let db = Arc::new(Database::in_memory());
        let registry = DeviceRegistry::new(Arc::clone(&db), Arc::new(TracingAuditSink));
        let store = SnapshotStore::new(Arc::clone(&db));

        let device = registry
            .add(Device::new("fw-1", "mock", "10.0.0.1", 443), "ops")
            .await
            .unwrap();
        store
            .create(device.id, "full", serde_json::json!({}), SnapshotTrigger::Manual, None)
            .await
            .unwrap();

        assert_eq!(registry.remove(device.id, "ops").await.unwrap(), 1);
        assert!(registry.get(device.id).await.is_err());
        assert!(store.latest(device.id, "full").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let registry = DeviceRegistry::new(Arc::new(Database::in_memory()), Arc::new(TracingAuditSink));
        registry.add(Device::new("fw-1", "mock", "10.0.0.1", 443), "ops").await.unwrap();
        let dup = registry.add(Device::new("fw-1", "mock", "10.0.0.2", 443), "ops").await;
        assert!(matches!(dup, Err(Error::InvalidArgument(_))));

        let found = registry.resolve("fw-1").await.unwrap();
        assert_eq!(found.mgmt_ip, "10.0.0.1");
    }
}
