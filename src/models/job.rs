//! Bulk job data model.

use super::snapshot::ConfigTree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A patch operation applied to a set of devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Surrogate identifier.
    pub id: Uuid,
    /// Job name.
    pub name: String,
    /// Configuration section the patch applies to.
    pub section: String,
    /// Configuration fragment deep-merged onto each device.
    pub patch: ConfigTree,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Restore succeeded targets when any target fails.
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// Five-field cron expression for templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Whether the scheduler clones this job.
    #[serde(default)]
    pub schedule_enabled: bool,
    /// Template this job was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    /// Actor that created the job.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether the scheduler treats this job as a template.
    pub fn is_template(&self) -> bool {
        self.schedule_enabled && self.cron_expression.is_some()
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One device's progress within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub job_id: Uuid,
    pub device_id: Uuid,
    pub status: TargetStatus,
    /// Device configuration before the patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<ConfigTree>,
    /// Computed configuration after the patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<ConfigTree>,
    /// Structural diff of before/after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ConfigTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl Target {
    /// Create a pending target.
    pub fn pending(job_id: Uuid, device_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            device_id,
            status: TargetStatus::Pending,
            before: None,
            after: None,
            diff: None,
            error: None,
            executed_at: None,
        }
    }
}

/// Target status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Success,
    Failed,
}

/// Timestamped job log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Job log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Parameters for creating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub section: String,
    pub patch: ConfigTree,
    pub device_ids: Vec<Uuid>,
    #[serde(default)]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default)]
    pub created_by: String,
}

/// Job with counts, as listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub section: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub target_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
}

impl JobSummary {
    /// Summarize a job from its targets.
    pub fn from_parts(job: &Job, targets: &[Target]) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            section: job.section.clone(),
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            target_count: targets.len(),
            success_count: targets
                .iter()
                .filter(|t| t.status == TargetStatus::Success)
                .count(),
            failed_count: targets
                .iter()
                .filter(|t| t.status == TargetStatus::Failed)
                .count(),
        }
    }
}

/// Job with its targets and log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub summary: JobSummary,
    pub job: Job,
    pub targets: Vec<Target>,
    pub logs: Vec<JobLog>,
}

/// Preview of a job against one device's last known configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPreview {
    pub device_id: Uuid,
    pub device_name: String,
    pub before: ConfigTree,
    pub after: ConfigTree,
    pub diff: ConfigTree,
}
