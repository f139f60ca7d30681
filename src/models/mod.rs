//! Data models.

pub mod config;
pub mod device;
pub mod job;
pub mod snapshot;

pub use device::{BackupSettings, Device};
pub use job::{
    Job, JobDetail, JobLog, JobStatus, JobSummary, LogLevel, NewJob, Target, TargetPreview,
    TargetStatus,
};
pub use snapshot::{ConfigTree, Snapshot, SnapshotSummary, SnapshotTrigger, FULL_SECTION};
