//! Mock firewall client.
//!
//! Simulates a small-office firewall without a real device. Each device keeps
//! its own in-memory configuration, seeded from a template the first time it
//! is touched. Devices can be marked unreachable or set to reject patches.

use super::device::{ApplyResult, DeviceClient, RestoreResult};
use crate::core::patch;
use crate::models::{ConfigTree, Device, FULL_SECTION};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    configs: HashMap<Uuid, ConfigTree>,
    unreachable: HashSet<Uuid>,
    rejecting: HashMap<Uuid, String>,
    apply_calls: HashMap<Uuid, usize>,
    restore_calls: HashMap<Uuid, usize>,
}

/// In-memory device client.
#[derive(Default)]
pub struct MockDeviceClient {
    state: Mutex<MockState>,
}

/// Configuration every mock device starts from.
pub fn template_config(index: usize, device: &Device) -> ConfigTree {
    json!({
        "system": {
            "hostname": format!("{}-{}", device.name, index),
            "firmware": "V5.37(ABFY.1)",
            "model": "USG FLEX 100",
            "login_timeout_minutes": 0,
            "auto_update_check": false
        },
        "interfaces": [
            {"name": "wan1", "type": "ethernet", "ip": "203.0.113.1", "mask": "255.255.255.0"},
            {"name": "lan1", "type": "ethernet", "ip": format!("192.168.{}.1", index), "mask": "255.255.255.0"}
        ],
        "routing": {"default_gateway": "203.0.113.254", "static_routes": []},
        "firewall_rules": [
            {"name": "Allow-LAN-to-WAN", "src_zone": "LAN", "dst_zone": "WAN", "action": "allow", "enabled": true},
            {"name": "Block-WAN-to-LAN", "src_zone": "WAN", "dst_zone": "LAN", "action": "deny", "enabled": true}
        ],
        "dns": {"servers": ["8.8.8.8", "8.8.4.4"], "search_domain": "local"},
        "ntp": {"servers": ["pool.ntp.org", "time.google.com"], "timezone": "UTC", "enabled": true},
        "snmp": {"enabled": true, "version": "v2c", "community": "public"},
        "logging": {"syslog_servers": [], "local_logging": true, "log_level": "warning"}
    })
}

impl MockDeviceClient {
    /// Create a client with no devices seeded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for a device fail as if the network were down.
    pub async fn set_unreachable(&self, device_id: Uuid, unreachable: bool) {
        let mut state = self.state.lock().await;
        if unreachable {
            state.unreachable.insert(device_id);
        } else {
            state.unreachable.remove(&device_id);
        }
    }

    /// Make patch pushes for a device report `success = false`.
    pub async fn set_rejecting(&self, device_id: Uuid, message: Option<&str>) {
        let mut state = self.state.lock().await;
        match message {
            Some(msg) => {
                state.rejecting.insert(device_id, msg.to_string());
            }
            None => {
                state.rejecting.remove(&device_id);
            }
        }
    }

    /// Replace the stored configuration of a device.
    pub async fn set_config(&self, device_id: Uuid, config: ConfigTree) {
        self.state.lock().await.configs.insert(device_id, config);
    }

    /// Current configuration of a device, if it has been touched.
    pub async fn config(&self, device_id: Uuid) -> Option<ConfigTree> {
        self.state.lock().await.configs.get(&device_id).cloned()
    }

    /// Number of patch pushes received by a device.
    pub async fn apply_calls(&self, device_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state.apply_calls.get(&device_id).copied().unwrap_or(0)
    }

    /// Number of full restores received by a device.
    pub async fn restore_calls(&self, device_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state.restore_calls.get(&device_id).copied().unwrap_or(0)
    }
}

impl MockState {
    fn ensure_reachable(&self, device: &Device) -> Result<()> {
        if self.unreachable.contains(&device.id) {
            return Err(crate::Error::Device(format!(
                "Connection to {}:{} timed out",
                device.mgmt_ip, device.port
            )));
        }
        Ok(())
    }

    fn config_mut(&mut self, device: &Device) -> &mut ConfigTree {
        let index = self.configs.len() + 1;
        self.configs
            .entry(device.id)
            .or_insert_with(|| template_config(index, device))
    }
}

#[async_trait]
impl DeviceClient for MockDeviceClient {
    async fn fetch(&self, device: &Device, section: &str) -> Result<ConfigTree> {
        let mut state = self.state.lock().await;
        state.ensure_reachable(device)?;

        let config = state.config_mut(device);
        if section == FULL_SECTION {
            return Ok(config.clone());
        }
        Ok(config
            .get(section)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    async fn apply(
        &self,
        device: &Device,
        section: &str,
        patch_value: &ConfigTree,
    ) -> Result<ApplyResult> {
        let mut state = self.state.lock().await;
        state.ensure_reachable(device)?;
        *state.apply_calls.entry(device.id).or_default() += 1;

        if let Some(message) = state.rejecting.get(&device.id).cloned() {
            return Ok(ApplyResult {
                success: false,
                message,
                rollback_hint: None,
            });
        }

        let config = state.config_mut(device);
        if section == FULL_SECTION {
            *config = patch::apply(config, patch_value);
        } else {
            let current = config
                .get(section)
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));
            let merged = patch::apply(&current, patch_value);
            if let Value::Object(map) = config {
                map.insert(section.to_string(), merged);
            }
        }

        Ok(ApplyResult {
            success: true,
            message: format!("Mock: applied patch to '{}' on {}", section, device.name),
            rollback_hint: Some("Re-apply previous snapshot to revert.".to_string()),
        })
    }

    async fn restore(&self, device: &Device, config: &ConfigTree) -> Result<RestoreResult> {
        let mut state = self.state.lock().await;
        state.ensure_reachable(device)?;
        *state.restore_calls.entry(device.id).or_default() += 1;
        state.configs.insert(device.id, config.clone());

        Ok(RestoreResult {
            success: true,
            message: "Configuration restored successfully".to_string(),
        })
    }
}
