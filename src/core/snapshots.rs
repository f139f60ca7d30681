//! Snapshot store.
//!
//! Snapshots are immutable once written. Versions are allocated inside the
//! same transaction that inserts the snapshot, so two concurrent writers for
//! one `(device, section)` can never receive the same number. Retention runs
//! in that transaction too; its failures are logged and swallowed.

use crate::core::patch;
use crate::error::{ignore, Error, IgnoredKind};
use crate::models::{ConfigTree, Snapshot, SnapshotSummary, SnapshotTrigger};
use crate::storage::{Database, State};
use crate::utils::hash;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Diff between two snapshots of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairDiff {
    pub from: Uuid,
    pub to: Uuid,
    pub diff: ConfigTree,
}

/// Result of comparing two or more snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotComparison {
    /// Snapshots in the requested order, including their data.
    pub snapshots: Vec<Snapshot>,
    /// Diff of each consecutive pair.
    pub diffs: Vec<PairDiff>,
}

/// Manifest written at the root of a snapshot archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub device_id: Uuid,
    pub device_name: String,
    pub created_at: String,
    pub created_by: String,
    pub snapshots: Vec<SnapshotSummary>,
}

/// Persistent, versioned snapshot storage.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a new snapshot with the next version for its section.
    ///
    /// Applies the device's retention setting afterwards. A failing trim is
    /// logged and does not fail the create.
    pub async fn create(
        &self,
        device_id: Uuid,
        section: &str,
        data: ConfigTree,
        trigger: SnapshotTrigger,
        label: Option<&str>,
    ) -> Result<Snapshot> {
        let checksum = hash::checksum(&data);
        let section = section.to_string();
        let label = label.map(str::to_string);

        let snapshot = self
            .db
            .transaction(move |state| {
                let retention = state
                    .device(device_id)
                    .ok_or_else(|| Error::not_found("Device", device_id))?
                    .backup
                    .retention;

                let snapshot = Snapshot {
                    id: Uuid::new_v4(),
                    device_id,
                    version: state.next_version(device_id, &section),
                    section,
                    data,
                    checksum,
                    is_baseline: false,
                    trigger,
                    label,
                    created_at: Utc::now(),
                };
                state.snapshots.push(snapshot.clone());

                if let Some(keep_n) = retention {
                    ignore(IgnoredKind::Retention, trim_retention(state, device_id, keep_n));
                }

                Ok(snapshot)
            })
            .await?;

        tracing::info!(
            "Snapshot {} v{} of {} stored ({})",
            snapshot.section,
            snapshot.version,
            device_id,
            snapshot.trigger
        );
        Ok(snapshot)
    }

    /// Highest-version snapshot of a device section.
    pub async fn latest(&self, device_id: Uuid, section: &str) -> Option<Snapshot> {
        self.db
            .read(|s| s.latest_snapshot(device_id, section).cloned())
            .await
    }

    /// Baseline snapshot of a device section, if one is marked.
    pub async fn baseline(&self, device_id: Uuid, section: &str) -> Option<Snapshot> {
        self.db
            .read(|s| {
                s.snapshots
                    .iter()
                    .find(|snap| {
                        snap.device_id == device_id && snap.section == section && snap.is_baseline
                    })
                    .cloned()
            })
            .await
    }

    /// Delete all but the newest `keep_n` snapshots of a device.
    pub async fn enforce_retention(&self, device_id: Uuid, keep_n: usize) -> Result<usize> {
        self.db
            .transaction(|state| trim_retention(state, device_id, keep_n))
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Snapshot> {
        self.db
            .read(|s| s.snapshot(id).cloned())
            .await
            .ok_or_else(|| Error::not_found("Snapshot", id))
    }

    /// Snapshots of a device, newest first.
    pub async fn list(
        &self,
        device_id: Uuid,
        section: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<SnapshotSummary> {
        self.db
            .read(|s| {
                let mut matching: Vec<&Snapshot> = s
                    .snapshots
                    .iter()
                    .filter(|snap| snap.device_id == device_id)
                    .filter(|snap| section.map_or(true, |sec| snap.section == sec))
                    .collect();
                // Insertion order breaks created_at ties.
                matching.reverse();
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

                matching
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(SnapshotSummary::from)
                    .collect()
            })
            .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.db
            .transaction(|state| {
                let before = state.snapshots.len();
                state.snapshots.retain(|s| s.id != id);
                if state.snapshots.len() == before {
                    return Err(Error::not_found("Snapshot", id));
                }
                Ok(())
            })
            .await?;

        tracing::info!("Snapshot {} deleted", id);
        Ok(())
    }

    /// Mark a snapshot as the baseline of its section.
    ///
    /// Clears the flag on every other snapshot of the same device section.
    pub async fn set_baseline(&self, id: Uuid) -> Result<Snapshot> {
        let snapshot = self
            .db
            .transaction(|state| {
                let (device_id, section) = {
                    let target = state
                        .snapshot(id)
                        .ok_or_else(|| Error::not_found("Snapshot", id))?;
                    (target.device_id, target.section.clone())
                };

                let mut marked = None;
                for snap in state
                    .snapshots
                    .iter_mut()
                    .filter(|s| s.device_id == device_id && s.section == section)
                {
                    snap.is_baseline = snap.id == id;
                    if snap.is_baseline {
                        marked = Some(snap.clone());
                    }
                }
                marked.ok_or_else(|| Error::not_found("Snapshot", id))
            })
            .await?;

        tracing::info!(
            "Snapshot {} v{} is now the baseline of {}",
            snapshot.section,
            snapshot.version,
            snapshot.device_id
        );
        Ok(snapshot)
    }

    /// Compare snapshots pairwise in the given order.
    pub async fn compare(&self, ids: &[Uuid]) -> Result<SnapshotComparison> {
        if ids.len() < 2 {
            return Err(Error::InvalidArgument(
                "Need at least 2 snapshot IDs to compare".to_string(),
            ));
        }

        let snapshots = self
            .db
            .read(|s| {
                ids.iter()
                    .map(|id| s.snapshot(*id).cloned().ok_or_else(|| Error::not_found("Snapshot", id)))
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        let diffs = snapshots
            .windows(2)
            .map(|pair| PairDiff {
                from: pair[0].id,
                to: pair[1].id,
                diff: patch::diff(&pair[0].data, &pair[1].data).to_value(),
            })
            .collect();

        Ok(SnapshotComparison { snapshots, diffs })
    }

    /// Write every snapshot of a device to a zip archive.
    ///
    /// Layout: `manifest.json` plus `snapshots/{section}/v{version}.json`.
    pub async fn export(&self, device_id: Uuid, output_path: &Path) -> Result<ExportManifest> {
        let (device_name, snapshots) = self
            .db
            .read(|s| {
                let device = s
                    .device(device_id)
                    .ok_or_else(|| Error::not_found("Device", device_id))?;
                let snapshots: Vec<Snapshot> = s
                    .snapshots
                    .iter()
                    .filter(|snap| snap.device_id == device_id)
                    .cloned()
                    .collect();
                Ok::<_, Error>((device.name.clone(), snapshots))
            })
            .await?;

        let file = File::create(output_path)?;
        let mut zip = ZipWriter::new(file);
        let zip_options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for snapshot in &snapshots {
            let zip_path = format!(
                "snapshots/{}/v{}.json",
                sanitize_entry(&snapshot.section),
                snapshot.version
            );
            zip.start_file(zip_path.as_str(), zip_options)?;
            zip.write_all(serde_json::to_string_pretty(&snapshot.data)?.as_bytes())?;
            tracing::debug!("Exported: {}", zip_path);
        }

        let manifest = ExportManifest {
            device_id,
            device_name,
            created_at: Utc::now().to_rfc3339(),
            created_by: format!(
                "{}@{}",
                whoami::username(),
                whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string())
            ),
            snapshots: snapshots.iter().map(SnapshotSummary::from).collect(),
        };
        zip.start_file("manifest.json", zip_options)?;
        zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
        zip.finish()?;

        tracing::info!(
            "Exported {} snapshots of {} to {}",
            manifest.snapshots.len(),
            manifest.device_name,
            output_path.display()
        );
        Ok(manifest)
    }
}

/// Delete the oldest snapshots of a device beyond `keep_n`.
///
/// Counts across all sections, ordered by creation time. Returns the number
/// of deleted snapshots.
pub fn trim_retention(state: &mut State, device_id: Uuid, keep_n: usize) -> Result<usize> {
    if keep_n == 0 {
        return Err(Error::InvalidArgument(
            "retention must keep at least one snapshot".to_string(),
        ));
    }

    let mut owned: Vec<&Snapshot> = state
        .snapshots
        .iter()
        .filter(|s| s.device_id == device_id)
        .collect();
    if owned.len() <= keep_n {
        return Ok(0);
    }

    // Stable sort keeps insertion order for equal timestamps.
    owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let excess = owned.len() - keep_n;
    let doomed: HashSet<Uuid> = owned.iter().take(excess).map(|s| s.id).collect();

    state.snapshots.retain(|s| !doomed.contains(&s.id));
    tracing::info!(
        "Retention removed {} snapshots of {} (keeping {})",
        excess,
        device_id,
        keep_n
    );
    Ok(excess)
}

fn sanitize_entry(section: &str) -> String {
    section
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
