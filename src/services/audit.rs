//! Audit event sink.

use serde::Serialize;
use serde_json::Value;

/// Structured record of a mutating operation.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub actor: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: &str, actor: &str, resource_type: &str, resource_id: impl ToString) -> Self {
        Self {
            action: action.to_string(),
            actor: actor.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            request: None,
            response: None,
        }
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }
}

/// Fire-and-forget receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink writing audit events to the log under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", "{}", json),
            Err(e) => tracing::warn!(target: "audit", "Unserializable audit event {}: {}", event.action, e),
        }
    }
}
