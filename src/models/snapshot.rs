//! Configuration snapshot model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A device configuration tree: `Null | Bool | Number | String | Array | Object`.
pub type ConfigTree = serde_json::Value;

/// Section name covering the whole device configuration.
pub const FULL_SECTION: &str = "full";

/// One immutable, checksummed capture of a device configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Owning device.
    pub device_id: Uuid,
    /// `"full"` or a named subsystem such as `"ntp"`.
    pub section: String,
    /// Per `(device_id, section)` sequence number, starting at 1.
    pub version: u32,
    /// Captured configuration.
    pub data: ConfigTree,
    /// SHA-256 of the canonical JSON of `data`.
    pub checksum: String,
    /// Reference point for drift comparison.
    #[serde(default)]
    pub is_baseline: bool,
    /// Why the snapshot was taken.
    pub trigger: SnapshotTrigger,
    /// Optional free-text label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Size of the serialized configuration in bytes.
    pub fn size(&self) -> usize {
        serde_json::to_string(&self.data).map(|s| s.len()).unwrap_or(0)
    }
}

/// Reason a snapshot was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Sync,
    Manual,
    Schedule,
    PreRestore,
    Upload,
    BulkApply,
    Rollback,
}

impl std::fmt::Display for SnapshotTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotTrigger::Sync => "sync",
            SnapshotTrigger::Manual => "manual",
            SnapshotTrigger::Schedule => "schedule",
            SnapshotTrigger::PreRestore => "pre_restore",
            SnapshotTrigger::Upload => "upload",
            SnapshotTrigger::BulkApply => "bulk_apply",
            SnapshotTrigger::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Snapshot metadata without the configuration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub device_id: Uuid,
    pub section: String,
    pub version: u32,
    pub checksum: String,
    pub is_baseline: bool,
    pub trigger: SnapshotTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size: usize,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id,
            device_id: s.device_id,
            section: s.section.clone(),
            version: s.version,
            checksum: s.checksum.clone(),
            is_baseline: s.is_baseline,
            trigger: s.trigger,
            label: s.label.clone(),
            created_at: s.created_at,
            size: s.size(),
        }
    }
}
