//! Managed device model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A managed firewall device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Client kind used to talk to the device (`mock`, `http`).
    pub adapter: String,
    /// Management address.
    pub mgmt_ip: String,
    /// Management port.
    pub port: u16,
    /// Set while the latest full snapshot differs from the baseline.
    #[serde(default)]
    pub drift_detected: bool,
    /// When drift was first detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_detected_at: Option<DateTime<Utc>>,
    /// Automatic backup and retention settings.
    #[serde(default)]
    pub backup: BackupSettings,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Create a device with default backup settings.
    pub fn new(name: &str, adapter: &str, mgmt_ip: &str, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            adapter: adapter.to_string(),
            mgmt_ip: mgmt_ip.to_string(),
            port,
            drift_detected: false,
            drift_detected_at: None,
            backup: BackupSettings::default(),
            created_at: Utc::now(),
        }
    }
}

/// Per-device backup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Whether the scheduled backup check includes this device.
    pub auto_backup_enabled: bool,
    /// Minimum hours between automatic backups.
    pub interval_hours: u32,
    /// Number of snapshots to keep; `None` keeps everything.
    ///
    /// Trimming is oldest-first across all sections and ignores the baseline
    /// flag, so a limit can remove a device's baseline.
    pub retention: Option<usize>,
    /// Last automatic backup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_auto_backup: Option<DateTime<Utc>>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            auto_backup_enabled: false,
            interval_hours: 24,
            retention: None,
            last_auto_backup: None,
        }
    }
}
