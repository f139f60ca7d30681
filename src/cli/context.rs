//! Wiring of services for CLI commands.

use crate::core::{
    BackupService, DeviceRegistry, DriftDetector, JobOrchestrator, Scheduler, SnapshotStore,
    TokioTaskQueue,
};
use crate::models::config::Config;
use crate::models::Device;
use crate::services::{
    AlertSink, AuditSink, ClientRegistry, HttpDeviceClient, MockDeviceClient, TracingAlertSink,
    TracingAuditSink, WebhookAlertSink,
};
use crate::storage::Database;
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Every service a command may need, sharing one database.
pub struct App {
    pub config: Config,
    pub db: Arc<Database>,
    pub devices: DeviceRegistry,
    pub snapshots: SnapshotStore,
    pub orchestrator: JobOrchestrator,
    pub backups: BackupService,
    pub drift: DriftDetector,
    pub scheduler: Scheduler,
    /// `user@host` recorded on audit events.
    pub actor: String,
}

impl App {
    /// Open the data directory and build the services.
    pub fn open(config: Config) -> Result<Self> {
        let db = Arc::new(Database::open(&config.data_dir)?);

        let mut clients = ClientRegistry::new();
        clients.register("mock", Arc::new(MockDeviceClient::new()));
        clients.register("http", Arc::new(HttpDeviceClient::new(&config.http)?));
        let clients = Arc::new(clients);

        let alerts: Arc<dyn AlertSink> = match config.alerts.webhook_url {
            Some(ref url) => Arc::new(WebhookAlertSink::new(url)),
            None => Arc::new(TracingAlertSink),
        };
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

        let orchestrator = JobOrchestrator::new(Arc::clone(&db), Arc::clone(&clients))
            .with_alerts(Arc::clone(&alerts))
            .with_audit(Arc::clone(&audit))
            .with_queue(Arc::new(TokioTaskQueue::new(
                config.orchestrator.max_concurrent_jobs,
            )));

        Ok(Self {
            devices: DeviceRegistry::new(Arc::clone(&db), Arc::clone(&audit)),
            snapshots: SnapshotStore::new(Arc::clone(&db)),
            backups: BackupService::new(Arc::clone(&db), clients, audit),
            drift: DriftDetector::new(Arc::clone(&db), alerts),
            scheduler: Scheduler::with_grace(orchestrator.clone(), config.scheduler.grace_secs),
            orchestrator,
            db,
            config,
            actor: format!(
                "{}@{}",
                whoami::username(),
                whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string())
            ),
        })
    }

    /// Resolve a device by name or id.
    pub async fn device(&self, key: &str) -> Result<Device> {
        self.devices.resolve(key).await
    }
}

/// Parse a UUID argument.
pub fn parse_id(kind: &'static str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| crate::Error::InvalidArgument(format!("invalid {} id: {}", kind, raw)))
}
