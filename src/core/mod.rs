//! Core business logic modules.

pub mod backup;
pub mod cron;
pub mod devices;
pub mod drift;
pub mod orchestrator;
pub mod patch;
pub mod queue;
pub mod scheduler;
pub mod snapshots;

pub use backup::{BackupReport, BackupService, RestoreOutcome};
pub use cron::CronExpr;
pub use devices::DeviceRegistry;
pub use drift::{DriftDetector, DriftOutcome};
pub use orchestrator::JobOrchestrator;
pub use queue::{CancelToken, TaskHandle, TaskQueue, TokioTaskQueue};
pub use scheduler::{Scheduler, TickReport};
pub use snapshots::{SnapshotComparison, SnapshotStore};
