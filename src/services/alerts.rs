//! Alert sinks.
//!
//! Alerts are fire-and-forget: a sink logs its own delivery failures and
//! never reports them to the caller.

use crate::error::{Error, IgnoredKind};
use serde::Serialize;
use serde_json::Value;

/// Event name fired when a job finishes with failed targets.
pub const JOB_FAILED: &str = "job_failed";
/// Event name fired when a device drifts from its baseline.
pub const DRIFT_DETECTED: &str = "drift_detected";

/// Receiver of named alert events.
pub trait AlertSink: Send + Sync {
    fn fire(&self, event: &str, payload: Value);
}

/// Sink that only writes alerts to the log.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn fire(&self, event: &str, payload: Value) {
        tracing::warn!(event = event, "Alert: {}", payload);
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    event: &'a str,
    payload: Value,
    fired_at: String,
}

/// Sink posting alerts as JSON to a webhook.
pub struct WebhookAlertSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    /// Create a sink for a webhook URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl AlertSink for WebhookAlertSink {
    fn fire(&self, event: &str, payload: Value) {
        tracing::info!(event = event, "Delivering alert to {}", self.url);

        let body = WebhookBody {
            event,
            payload,
            fired_at: chrono::Utc::now().to_rfc3339(),
        };
        let request = self.client.post(&self.url).json(&body);
        let url = self.url.clone();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            Error::ignored(IgnoredKind::Alert, "no async runtime for webhook delivery").log_ignored();
            return;
        };

        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("Alert delivered to {}", url);
                }
                Ok(resp) => Error::ignored(
                    IgnoredKind::Alert,
                    format!("webhook {} answered {}", url, resp.status()),
                )
                .log_ignored(),
                Err(e) => Error::ignored(IgnoredKind::Alert, e).log_ignored(),
            }
        });
    }
}
