//! Device client capability.
//!
//! A [`DeviceClient`] talks to one kind of device. The [`ClientRegistry`]
//! resolves the client for a device from its `adapter` field.

use crate::models::{ConfigTree, Device};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a patch push. `success = false` is an expected result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_hint: Option<String>,
}

/// Outcome of a full configuration push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub success: bool,
    pub message: String,
}

/// Remote operations on a device.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetch the current configuration, the whole tree or one section.
    async fn fetch(&self, device: &Device, section: &str) -> Result<ConfigTree>;

    /// Deep-merge a patch into one section on the device.
    async fn apply(&self, device: &Device, section: &str, patch: &ConfigTree)
        -> Result<ApplyResult>;

    /// Replace the whole configuration.
    async fn restore(&self, device: &Device, config: &ConfigTree) -> Result<RestoreResult> {
        let _ = config;
        Err(crate::Error::Unsupported(format!(
            "restore not supported by adapter '{}'",
            device.adapter
        )))
    }
}

/// Device clients keyed by adapter name.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Arc<dyn DeviceClient>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client for an adapter name.
    pub fn register(&mut self, adapter: &str, client: Arc<dyn DeviceClient>) {
        self.clients.insert(adapter.to_string(), client);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: &str, client: Arc<dyn DeviceClient>) -> Self {
        self.register(adapter, client);
        self
    }

    /// Client for a device.
    pub fn client_for(&self, device: &Device) -> Result<Arc<dyn DeviceClient>> {
        self.clients.get(&device.adapter).cloned().ok_or_else(|| {
            crate::Error::Device(format!("No client registered for adapter '{}'", device.adapter))
        })
    }

    /// Registered adapter names.
    pub fn adapters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}
