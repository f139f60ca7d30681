//! External collaborators: device clients, alert and audit sinks.

pub mod alerts;
pub mod audit;
pub mod device;
pub mod http;
pub mod mock;

pub use alerts::{AlertSink, TracingAlertSink, WebhookAlertSink};
pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use device::{ApplyResult, ClientRegistry, DeviceClient, RestoreResult};
pub use http::HttpDeviceClient;
pub use mock::MockDeviceClient;
