//! Shared fixtures for integration tests.

#![allow(dead_code)]

use fleet_orchestrator::core::queue::{CancelToken, JobFuture, TaskHandle, TaskQueue};
use fleet_orchestrator::core::JobOrchestrator;
use fleet_orchestrator::models::Device;
use fleet_orchestrator::services::{
    AlertSink, AuditEvent, AuditSink, ClientRegistry, DeviceClient, MockDeviceClient,
};
use fleet_orchestrator::storage::Database;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

/// Alert sink remembering every event.
#[derive(Default)]
pub struct RecordingAlerts {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingAlerts {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|(name, _)| name == event).count()
    }
}

impl AlertSink for RecordingAlerts {
    fn fire(&self, event: &str, payload: Value) {
        self.events.lock().unwrap().push((event.to_string(), payload));
    }
}

/// Audit sink remembering every action.
#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Queue that holds work until `run_all` is called.
#[derive(Default)]
pub struct ManualQueue {
    pending: Mutex<Vec<(JobFuture, watch::Sender<bool>)>>,
}

impl ManualQueue {
    pub async fn run_all(&self) {
        let work: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (future, done) in work {
            future.await;
            let _ = done.send(true);
        }
    }
}

impl TaskQueue for ManualQueue {
    fn submit(&self, _job_id: Uuid, cancel: CancelToken, work: JobFuture) -> TaskHandle {
        let (tx, rx) = watch::channel(false);
        self.pending.lock().unwrap().push((work, tx));
        TaskHandle::new(cancel, rx)
    }
}

/// A database with mock devices and an orchestrator wired to recording sinks.
pub struct Fleet {
    pub db: Arc<Database>,
    pub mock: Arc<MockDeviceClient>,
    pub clients: Arc<ClientRegistry>,
    pub alerts: Arc<RecordingAlerts>,
    pub audit: Arc<RecordingAudit>,
    pub orchestrator: JobOrchestrator,
    pub devices: Vec<Device>,
}

/// Build a fleet of `count` mock devices named `fw-1..`.
pub async fn fleet(count: usize) -> Fleet {
    let mock = Arc::new(MockDeviceClient::new());
    fleet_with_client(count, mock.clone(), mock).await
}

/// Build a fleet whose `mock` adapter is served by `client`.
pub async fn fleet_with_client(
    count: usize,
    mock: Arc<MockDeviceClient>,
    client: Arc<dyn DeviceClient>,
) -> Fleet {
    let db = Arc::new(Database::in_memory());
    let devices: Vec<Device> = (1..=count)
        .map(|i| Device::new(&format!("fw-{}", i), "mock", &format!("10.0.0.{}", i), 443))
        .collect();
    let stored = devices.clone();
    db.transaction(|state| {
        state.devices.extend(stored);
        Ok(())
    })
    .await
    .unwrap();

    let clients = Arc::new(ClientRegistry::new().with("mock", client));
    let alerts = Arc::new(RecordingAlerts::default());
    let audit = Arc::new(RecordingAudit::default());
    let orchestrator = JobOrchestrator::new(Arc::clone(&db), Arc::clone(&clients))
        .with_alerts(alerts.clone())
        .with_audit(audit.clone());

    Fleet {
        db,
        mock,
        clients,
        alerts,
        audit,
        orchestrator,
        devices,
    }
}
