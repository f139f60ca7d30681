//! Persisted state.
//!
//! All records live in one [`State`] guarded by a single writer lock. Every
//! mutation runs through [`Database::transaction`], which works on a copy of
//! the state and only publishes it after the copy has been written to
//! `state.json`. A failed closure or a failed write leaves nothing behind.

use crate::models::{Device, Job, JobLog, Snapshot, Target};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

const STATE_FILE: &str = "state.json";
const STATE_VERSION: &str = "1.0";

/// Every persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Schema version.
    pub version: String,
    pub devices: Vec<Device>,
    /// Snapshots in insertion order.
    pub snapshots: Vec<Snapshot>,
    pub jobs: Vec<Job>,
    pub targets: Vec<Target>,
    pub logs: Vec<JobLog>,
    /// Last version handed out per `device_id/section`. Survives trimming.
    #[serde(default)]
    pub sequences: BTreeMap<String, u32>,
    /// Most recent cron occurrence cloned per template.
    #[serde(default)]
    pub fire_watermarks: BTreeMap<Uuid, DateTime<Utc>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            devices: Vec::new(),
            snapshots: Vec::new(),
            jobs: Vec::new(),
            targets: Vec::new(),
            logs: Vec::new(),
            sequences: BTreeMap::new(),
            fire_watermarks: BTreeMap::new(),
        }
    }
}

impl State {
    pub fn device(&self, id: Uuid) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn device_mut(&mut self, id: Uuid) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    pub fn job(&self, id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn last_fired(&self, template_id: Uuid) -> Option<DateTime<Utc>> {
        self.fire_watermarks.get(&template_id).copied()
    }

    pub fn job_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn target_mut(&mut self, id: Uuid) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.id == id)
    }

    /// Targets of a job in creation order.
    pub fn targets_for(&self, job_id: Uuid) -> Vec<Target> {
        self.targets
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Log lines of a job in creation order.
    pub fn logs_for(&self, job_id: Uuid) -> Vec<JobLog> {
        self.logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self, id: Uuid) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    /// Highest version stored for a device section, if any.
    pub fn max_version(&self, device_id: Uuid, section: &str) -> Option<u32> {
        self.snapshots
            .iter()
            .filter(|s| s.device_id == device_id && s.section == section)
            .map(|s| s.version)
            .max()
    }

    /// Reserve the next snapshot version for a device section.
    ///
    /// Versions are never reused, even after older snapshots were trimmed.
    pub fn next_version(&mut self, device_id: Uuid, section: &str) -> u32 {
        let key = format!("{}/{}", device_id, section);
        let stored = self.max_version(device_id, section).unwrap_or(0);
        let counter = self.sequences.entry(key).or_insert(0);
        *counter = (*counter).max(stored) + 1;
        *counter
    }

    /// Snapshot with the highest version for a device section.
    pub fn latest_snapshot(&self, device_id: Uuid, section: &str) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.device_id == device_id && s.section == section)
            .max_by_key(|s| s.version)
    }
}

/// State store with optional JSON persistence.
pub struct Database {
    state: RwLock<State>,
    path: Option<PathBuf>,
}

impl Database {
    /// Create a store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(State::default()),
            path: None,
        }
    }

    /// Open the store in `dir`, loading `state.json` when present.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE);

        let state = if path.exists() {
            let state = load_state(&path)?;
            tracing::info!(
                "Loaded state from {:?} ({} devices, {} snapshots, {} jobs)",
                path,
                state.devices.len(),
                state.snapshots.len(),
                state.jobs.len()
            );
            state
        } else {
            State::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Location of the state file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a read-only closure against the current state.
    pub async fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&State) -> T,
    {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Run a mutation atomically.
    ///
    /// The writer lock is held from the first read inside `f` until the new
    /// state is published, so read-then-write sequences cannot interleave.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State) -> Result<T>,
    {
        let mut guard = self.state.write().await;
        let mut working = guard.clone();
        let value = f(&mut working)?;

        if let Some(ref path) = self.path {
            save_state(&working, path)?;
        }

        *guard = working;
        Ok(value)
    }
}

/// Save state to a JSON file, replacing the previous file atomically.
pub fn save_state(state: &State, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;

    let tmp_path = path.with_extension("json.tmp");
    write_synced(&tmp_path, json.as_bytes())
        .and_then(|_| fs::rename(&tmp_path, path))
        .map_err(|e| Error::Storage(format!("cannot write {}: {}", path.display(), e)))?;

    tracing::debug!("State saved to {:?}", path);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Load state from a JSON file.
pub fn load_state(path: &Path) -> Result<State> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Storage(format!("corrupt state file {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_closure_leaves_state_untouched() {
        let db = Database::in_memory();
        let result: Result<()> = db
            .transaction(|state| {
                state.devices.push(Device::new("fw-1", "mock", "10.0.0.1", 443));
                Err(crate::Error::other("abort"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(db.read(|s| s.devices.len()).await, 0);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(temp_dir.path()).unwrap();
        db.transaction(|state| {
            state.devices.push(Device::new("fw-1", "mock", "10.0.0.1", 443));
            Ok(())
        })
        .await
        .unwrap();

        let reopened = Database::open(temp_dir.path()).unwrap();
        let names = reopened
            .read(|s| s.devices.iter().map(|d| d.name.clone()).collect::<Vec<_>>())
            .await;
        assert_eq!(names, vec!["fw-1".to_string()]);
    }

    #[tokio::test]
    async fn test_write_failure_discards_change() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().join("data");
        let db = Database::open(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let result = db
            .transaction(|state| {
                state.devices.push(Device::new("fw-1", "mock", "10.0.0.1", 443));
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(db.read(|s| s.devices.len()).await, 0);
    }

    #[test]
    fn test_corrupt_state_file_is_a_storage_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        fs::write(temp_dir.path().join("state.json"), "{not json").unwrap();

        let err = Database::open(temp_dir.path()).err().unwrap();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("corrupt state file"));
    }
}
