//! JSON-over-HTTP device client.
//!
//! Talks to devices exposing a small management API:
//! - `GET  {base}/api/config/{section}`: current configuration
//! - `POST {base}/api/config/{section}/patch`: deep-merge a patch
//! - `PUT  {base}/api/config`: replace the whole configuration

use super::device::{ApplyResult, DeviceClient, RestoreResult};
use crate::models::config::HttpConfig;
use crate::models::{ConfigTree, Device};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// HTTP device client.
pub struct HttpDeviceClient {
    client: reqwest::Client,
    scheme: String,
}

/// Response body of the patch and restore endpoints.
#[derive(Debug, Deserialize)]
struct PushResponse {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    rollback_hint: Option<String>,
}

impl HttpDeviceClient {
    /// Create a client using HTTPS.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Self::with_scheme(config, "https")
    }

    /// Create a client using a specific URL scheme.
    pub fn with_scheme(config: &HttpConfig, scheme: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            scheme: scheme.to_string(),
        })
    }

    fn base_url(&self, device: &Device) -> String {
        format!("{}://{}:{}", self.scheme, device.mgmt_ip, device.port)
    }

    fn section_url(&self, device: &Device, section: &str) -> String {
        format!(
            "{}/api/config/{}",
            self.base_url(device),
            urlencoding::encode(section)
        )
    }

    async fn push(&self, request: reqwest::RequestBuilder) -> Result<PushResponse> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(PushResponse {
                success: false,
                message: format!("HTTP {}: {}", status, body.trim()),
                rollback_hint: None,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn fetch(&self, device: &Device, section: &str) -> Result<ConfigTree> {
        let url = self.section_url(device, section);
        tracing::debug!("Fetching {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(crate::Error::Device(format!(
                "Fetch from {} failed with status: {}",
                device.name,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn apply(&self, device: &Device, section: &str, patch: &ConfigTree) -> Result<ApplyResult> {
        let url = format!("{}/patch", self.section_url(device, section));
        tracing::debug!("Pushing patch to {}", url);

        let resp = self.push(self.client.post(&url).json(patch)).await?;
        Ok(ApplyResult {
            success: resp.success,
            message: resp.message,
            rollback_hint: resp.rollback_hint,
        })
    }

    async fn restore(&self, device: &Device, config: &ConfigTree) -> Result<RestoreResult> {
        let url = format!("{}/api/config", self.base_url(device));
        tracing::debug!("Restoring configuration via {}", url);

        let resp = self.push(self.client.put(&url).json(config)).await?;
        Ok(RestoreResult {
            success: resp.success,
            message: resp.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_url_is_encoded() {
        let client = HttpDeviceClient::with_scheme(&HttpConfig::default(), "http").unwrap();
        let device = Device::new("fw", "http", "10.0.0.1", 8443);
        assert_eq!(
            client.section_url(&device, "nat rules"),
            "http://10.0.0.1:8443/api/config/nat%20rules"
        );
    }
}
