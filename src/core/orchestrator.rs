//! Bulk job orchestration.
//!
//! A job moves `pending -> queued -> running -> {completed | partial}`, or to
//! `cancelled` from any non-terminal state. A queued job the worker cannot
//! start ends as `failed`. Execution is handed to a
//! [`TaskQueue`]; the worker processes targets one at a time:
//! - fetch the live section as `before`
//! - compute `after` and the diff
//! - push the patch
//! - record the outcome and snapshot `after` on success
//!
//! A failing target never stops the batch. When any target failed, one
//! `job_failed` alert is fired and, if requested, successful targets are
//! restored to their `before` configuration.

use crate::core::cron::CronExpr;
use crate::core::patch;
use crate::core::queue::{CancelToken, TaskHandle, TaskQueue, TokioTaskQueue};
use crate::core::snapshots::SnapshotStore;
use crate::error::{Error, IgnoredKind};
use crate::models::{
    ConfigTree, Device, Job, JobDetail, JobLog, JobStatus, JobSummary, LogLevel, NewJob,
    SnapshotTrigger, Target, TargetPreview, TargetStatus, FULL_SECTION,
};
use crate::services::alerts::{AlertSink, TracingAlertSink, JOB_FAILED};
use crate::services::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::services::device::{ClientRegistry, DeviceClient};
use crate::storage::{Database, State};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default number of jobs running at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Outcome of one target, as recorded by the worker.
#[derive(Debug)]
enum TargetOutcome {
    Success {
        before: ConfigTree,
        after: ConfigTree,
        diff: ConfigTree,
    },
    Failed {
        before: Option<ConfigTree>,
        error: String,
    },
}

/// Drives bulk jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    db: Arc<Database>,
    snapshots: SnapshotStore,
    clients: Arc<ClientRegistry>,
    alerts: Arc<dyn AlertSink>,
    audit: Arc<dyn AuditSink>,
    queue: Arc<dyn TaskQueue>,
    handles: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
}

impl JobOrchestrator {
    /// Create an orchestrator with log-only sinks and a tokio worker pool.
    pub fn new(db: Arc<Database>, clients: Arc<ClientRegistry>) -> Self {
        Self {
            snapshots: SnapshotStore::new(Arc::clone(&db)),
            db,
            clients,
            alerts: Arc::new(TracingAlertSink),
            audit: Arc::new(TracingAuditSink),
            queue: Arc::new(TokioTaskQueue::new(DEFAULT_MAX_CONCURRENT_JOBS)),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Persist a job with one pending target per device.
    pub async fn create(&self, new_job: NewJob) -> Result<Job> {
        validate(&new_job)?;

        let mut device_ids: Vec<Uuid> = Vec::with_capacity(new_job.device_ids.len());
        for id in &new_job.device_ids {
            if !device_ids.contains(id) {
                device_ids.push(*id);
            }
        }

        let job = Job {
            id: Uuid::new_v4(),
            name: new_job.name,
            section: new_job.section,
            patch: new_job.patch,
            status: JobStatus::Pending,
            rollback_on_failure: new_job.rollback_on_failure,
            cron_expression: new_job.cron_expression,
            schedule_enabled: new_job.schedule_enabled,
            template_id: None,
            created_by: new_job.created_by,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let target_count = device_ids.len();
        let stored = job.clone();
        self.db
            .transaction(move |state| {
                insert_job(state, stored, &device_ids);
                Ok(())
            })
            .await?;

        tracing::info!(
            "Created job {} '{}' for section {} ({} devices)",
            job.id,
            job.name,
            job.section,
            target_count
        );
        self.audit.record(
            AuditEvent::new("create_bulk_job", &job.created_by, "bulk_job", job.id).with_request(
                json!({
                    "name": job.name,
                    "section": job.section,
                    "device_count": target_count,
                    "rollback_on_failure": job.rollback_on_failure,
                    "cron_expression": job.cron_expression,
                }),
            ),
        );
        Ok(job)
    }

    /// Show what the patch would do against each device's last snapshot.
    ///
    /// Read-only. Devices without a snapshot of the section start from `{}`.
    pub async fn preview(&self, job_id: Uuid) -> Result<Vec<TargetPreview>> {
        self.db
            .read(|state| {
                let job = state.job(job_id).ok_or_else(|| Error::not_found("Job", job_id))?;

                let previews = state
                    .targets_for(job_id)
                    .iter()
                    .filter_map(|target| state.device(target.device_id))
                    .map(|device| {
                        let before = state
                            .latest_snapshot(device.id, &job.section)
                            .map(|s| s.data.clone())
                            .unwrap_or_else(|| json!({}));
                        let after = patch::apply(&before, &job.patch);
                        let diff = patch::diff(&before, &after).to_value();
                        TargetPreview {
                            device_id: device.id,
                            device_name: device.name.clone(),
                            before,
                            after,
                            diff,
                        }
                    })
                    .collect();
                Ok(previews)
            })
            .await
    }

    /// Queue a pending job for background execution.
    pub async fn execute(&self, job_id: Uuid) -> Result<TaskHandle> {
        let job = self
            .db
            .transaction(|state| {
                let job = state
                    .job_mut(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?;
                if job.status != JobStatus::Pending {
                    return Err(Error::InvalidState(format!("Job is already {}", job.status)));
                }
                job.status = JobStatus::Queued;
                let job = job.clone();
                push_log(state, job_id, LogLevel::Info, "Job queued for execution");
                Ok(job)
            })
            .await?;

        let cancel = CancelToken::new();
        let worker = self.clone();
        let token = cancel.clone();
        let handle = self.queue.submit(
            job_id,
            cancel,
            Box::pin(async move {
                if let Err(e) = worker.run_job(job_id, &token).await {
                    tracing::error!("Worker for job {} stopped: {}", job_id, e);
                    worker.fail_undispatched(job_id, &e).await;
                }
            }),
        );

        {
            let mut handles = self.handles.lock().await;
            handles.retain(|_, h| !h.is_finished());
            handles.insert(job_id, handle.clone());
        }

        tracing::info!("Job {} '{}' queued", job.id, job.name);
        self.audit.record(AuditEvent::new(
            "execute_bulk_job",
            &job.created_by,
            "bulk_job",
            job_id,
        ));
        Ok(handle)
    }

    /// Move a job the worker gave up on before it started running to `failed`.
    async fn fail_undispatched(&self, job_id: Uuid, error: &Error) {
        let message = format!("Job failed before dispatch: {}", error);
        let marked = self
            .db
            .transaction(|state| {
                match state.job_mut(job_id) {
                    Some(job) if job.status == JobStatus::Queued => {
                        job.status = JobStatus::Failed;
                        job.completed_at = Some(Utc::now());
                    }
                    _ => return Ok(false),
                }
                push_log(state, job_id, LogLevel::Error, message);
                Ok(true)
            })
            .await;

        match marked {
            Ok(true) => tracing::warn!("Job {} marked failed", job_id),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not mark job {} failed: {}", job_id, e),
        }
    }

    /// Process every target of a job. Runs on the worker.
    pub async fn run_job(&self, job_id: Uuid, cancel: &CancelToken) -> Result<()> {
        let started = self
            .db
            .transaction(|state| {
                let status = state
                    .job(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?
                    .status;
                if status == JobStatus::Cancelled {
                    return Ok(None);
                }
                let targets = state.targets_for(job_id);
                if targets.is_empty() {
                    return Err(Error::InvalidJob("job has no targets to dispatch".to_string()));
                }
                let job = state
                    .job_mut(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?;
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                let job = job.clone();
                push_log(
                    state,
                    job_id,
                    LogLevel::Info,
                    format!("Job started with {} targets", targets.len()),
                );
                Ok(Some((job, targets)))
            })
            .await?;

        let Some((job, targets)) = started else {
            tracing::info!("Job {} was cancelled before it started", job_id);
            return Ok(());
        };

        tracing::info!("Running job {} '{}' on {} targets", job.id, job.name, targets.len());

        let mut succeeded: Vec<Target> = Vec::new();
        let mut fail_count = 0;

        for (idx, target) in targets.iter().enumerate() {
            if cancel.is_cancelled() || self.is_cancelled(job_id).await {
                let remaining = targets.len() - idx;
                tracing::info!("Job {} cancelled, {} targets not started", job_id, remaining);
                self.log(
                    job_id,
                    LogLevel::Warning,
                    format!("Cancelled, {} targets not started", remaining),
                )
                .await?;
                return Ok(());
            }

            tracing::info!(
                "Execute [{}/{}]: device {}",
                idx + 1,
                targets.len(),
                target.device_id
            );

            let device = self.db.read(|s| s.device(target.device_id).cloned()).await;
            let outcome = match device {
                None => TargetOutcome::Failed {
                    before: None,
                    error: "Device not found".to_string(),
                },
                Some(ref device) => self.apply_to_device(&job, device).await,
            };

            let recorded = self.record_outcome(&job, target, device.as_ref(), outcome).await?;
            match recorded.status {
                TargetStatus::Success => succeeded.push(recorded),
                _ => fail_count += 1,
            }
        }

        let success_count = succeeded.len();
        let finished = self
            .db
            .transaction(|state| {
                let job = state
                    .job_mut(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?;
                // A cancel that landed during the last target stands.
                if job.status == JobStatus::Cancelled {
                    return Ok(false);
                }
                job.status = if fail_count == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::Partial
                };
                job.completed_at = Some(Utc::now());
                let status = job.status;
                push_log(
                    state,
                    job_id,
                    if fail_count == 0 { LogLevel::Info } else { LogLevel::Warning },
                    format!(
                        "Job {}: {} succeeded, {} failed",
                        status, success_count, fail_count
                    ),
                );
                Ok(true)
            })
            .await?;

        if !finished {
            return Ok(());
        }

        tracing::info!(
            "Job {} finished: {} succeeded, {} failed",
            job_id,
            success_count,
            fail_count
        );

        if fail_count > 0 {
            self.alerts.fire(
                JOB_FAILED,
                json!({
                    "job_id": job_id,
                    "job_name": job.name,
                    "fail_count": fail_count,
                    "success_count": success_count,
                }),
            );

            if job.rollback_on_failure && !succeeded.is_empty() {
                self.rollback(&job, &succeeded).await?;
            }
        }

        Ok(())
    }

    async fn apply_to_device(&self, job: &Job, device: &Device) -> TargetOutcome {
        let client = match self.clients.client_for(device) {
            Ok(client) => client,
            Err(e) => {
                return TargetOutcome::Failed {
                    before: None,
                    error: e.to_string(),
                }
            }
        };

        let before = match client.fetch(device, &job.section).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Fetch from {} failed: {}", device.name, e);
                return TargetOutcome::Failed {
                    before: None,
                    error: e.to_string(),
                };
            }
        };

        let after = patch::apply(&before, &job.patch);
        let diff = patch::diff(&before, &after).to_value();

        match client.apply(device, &job.section, &job.patch).await {
            Ok(result) if result.success => TargetOutcome::Success {
                before,
                after,
                diff,
            },
            Ok(result) => TargetOutcome::Failed {
                before: Some(before),
                error: result.message,
            },
            Err(e) => {
                tracing::warn!("Apply on {} failed: {}", device.name, e);
                TargetOutcome::Failed {
                    before: Some(before),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Store a target outcome; successful targets also get a snapshot.
    async fn record_outcome(
        &self,
        job: &Job,
        target: &Target,
        device: Option<&Device>,
        outcome: TargetOutcome,
    ) -> Result<Target> {
        let device_name = device
            .map(|d| d.name.clone())
            .unwrap_or_else(|| target.device_id.to_string());
        let snapshot_data = match &outcome {
            TargetOutcome::Success { after, .. } => Some(after.clone()),
            TargetOutcome::Failed { .. } => None,
        };

        let target_id = target.id;
        let job_id = job.id;
        let recorded = self
            .db
            .transaction(move |state| {
                let target = state
                    .target_mut(target_id)
                    .ok_or_else(|| Error::not_found("Target", target_id))?;
                target.executed_at = Some(Utc::now());

                let (level, message) = match outcome {
                    TargetOutcome::Success {
                        before,
                        after,
                        diff,
                    } => {
                        target.status = TargetStatus::Success;
                        target.before = Some(before);
                        target.after = Some(after);
                        target.diff = Some(diff);
                        (LogLevel::Info, format!("{}: patch applied", device_name))
                    }
                    TargetOutcome::Failed { before, error } => {
                        target.status = TargetStatus::Failed;
                        target.before = before;
                        let message = format!("{}: {}", device_name, error);
                        target.error = Some(error);
                        (LogLevel::Error, message)
                    }
                };
                let target = target.clone();
                push_log(state, job_id, level, message);
                Ok(target)
            })
            .await?;

        if let Some(data) = snapshot_data {
            let label = format!("bulk job: {}", job.name);
            if let Err(e) = self
                .snapshots
                .create(
                    recorded.device_id,
                    &job.section,
                    data,
                    SnapshotTrigger::BulkApply,
                    Some(label.as_str()),
                )
                .await
            {
                tracing::error!("Snapshot after apply on {} failed: {}", recorded.device_id, e);
                self.log(
                    job.id,
                    LogLevel::Warning,
                    format!("Snapshot after apply failed for {}: {}", recorded.device_id, e),
                )
                .await?;
            }
        }

        Ok(recorded)
    }

    /// Restore successful targets to their captured `before`. Best-effort.
    async fn rollback(&self, job: &Job, targets: &[Target]) -> Result<()> {
        tracing::info!("Rolling back {} targets of job {}", targets.len(), job.id);
        self.log(
            job.id,
            LogLevel::Info,
            format!("Rolling back {} successful targets", targets.len()),
        )
        .await?;

        for target in targets {
            match self.rollback_target(job, target).await {
                Ok(()) => {
                    self.log(
                        job.id,
                        LogLevel::Info,
                        format!("Rolled back device {}", target.device_id),
                    )
                    .await?;
                }
                Err(e) => {
                    Error::ignored(
                        IgnoredKind::Rollback,
                        format!("device {}: {}", target.device_id, e),
                    )
                    .log_ignored();
                    self.log(
                        job.id,
                        LogLevel::Error,
                        format!("Rollback failed for device {}: {}", target.device_id, e),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn rollback_target(&self, job: &Job, target: &Target) -> Result<()> {
        let before = target
            .before
            .as_ref()
            .ok_or_else(|| Error::InvalidState("target has no captured configuration".to_string()))?;
        let device = self
            .db
            .read(|s| s.device(target.device_id).cloned())
            .await
            .ok_or_else(|| Error::not_found("Device", target.device_id))?;
        let client = self.clients.client_for(&device)?;

        let full = if job.section == FULL_SECTION {
            before.clone()
        } else {
            let mut live = client.fetch(&device, FULL_SECTION).await?;
            match live.as_object_mut() {
                Some(map) => {
                    map.insert(job.section.clone(), before.clone());
                }
                None => {
                    return Err(Error::Device(format!(
                        "{} returned a non-object configuration",
                        device.name
                    )))
                }
            }
            live
        };

        let reapplied =
            restore_or_reapply(client.as_ref(), &device, &job.section, &full, before).await?;
        if !reapplied {
            let label = format!("rollback of bulk job: {}", job.name);
            self.snapshots
                .create(
                    device.id,
                    &job.section,
                    before.clone(),
                    SnapshotTrigger::Rollback,
                    Some(label.as_str()),
                )
                .await?;
            tracing::info!("Rolled back {} after job {}", device.name, job.id);
            return Ok(());
        }

        // A re-applied patch merges, so keys added by the job can survive.
        let live = client.fetch(&device, &job.section).await?;
        let restored = &live == before;
        let label = if restored {
            format!("rollback of bulk job: {}", job.name)
        } else {
            format!("partial rollback of bulk job: {}", job.name)
        };
        self.snapshots
            .create(
                device.id,
                &job.section,
                live,
                SnapshotTrigger::Rollback,
                Some(label.as_str()),
            )
            .await?;

        if !restored {
            return Err(Error::Device(format!(
                "{} on {} still differs from its previous configuration after re-applying it",
                job.section, device.name
            )));
        }
        tracing::info!("Rolled back {} by re-applying its section after job {}", device.name, job.id);
        Ok(())
    }

    /// Cancel a job that has not reached a terminal state.
    ///
    /// A device call already in flight is not interrupted.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        let job = self
            .db
            .transaction(|state| {
                let job = state
                    .job_mut(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?;
                if job.status.is_terminal() {
                    return Err(Error::InvalidState(format!("Job is already {}", job.status)));
                }
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                let job = job.clone();
                push_log(state, job_id, LogLevel::Warning, "Job cancelled");
                Ok(job)
            })
            .await?;

        if let Some(handle) = self.handles.lock().await.get(&job_id) {
            handle.cancel();
        }

        tracing::info!("Job {} cancelled", job_id);
        self.audit.record(AuditEvent::new(
            "cancel_bulk_job",
            &job.created_by,
            "bulk_job",
            job_id,
        ));
        Ok(job)
    }

    /// Job with targets, logs and counts.
    pub async fn get(&self, job_id: Uuid) -> Result<JobDetail> {
        self.db.read(|state| detail(state, job_id)).await
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        self.db
            .read(|state| {
                let mut jobs: Vec<&Job> = state.jobs.iter().collect();
                jobs.reverse();
                jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                jobs.into_iter()
                    .map(|job| JobSummary::from_parts(job, &state.targets_for(job.id)))
                    .collect()
            })
            .await
    }

    /// Delete a job with its targets and logs.
    pub async fn delete(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .db
            .transaction(|state| {
                let job = state
                    .job(job_id)
                    .ok_or_else(|| Error::not_found("Job", job_id))?
                    .clone();
                if matches!(job.status, JobStatus::Queued | JobStatus::Running) {
                    return Err(Error::InvalidState(format!(
                        "Cannot delete a job that is {}",
                        job.status
                    )));
                }
                state.jobs.retain(|j| j.id != job_id);
                state.targets.retain(|t| t.job_id != job_id);
                state.logs.retain(|l| l.job_id != job_id);
                state.fire_watermarks.remove(&job_id);
                Ok(job)
            })
            .await?;

        self.handles.lock().await.remove(&job_id);
        tracing::info!("Job {} deleted", job_id);
        self.audit.record(AuditEvent::new(
            "delete_bulk_job",
            &job.created_by,
            "bulk_job",
            job_id,
        ));
        Ok(())
    }

    /// Wait for a job's worker to finish, then return the job.
    pub async fn wait(&self, job_id: Uuid) -> Result<JobDetail> {
        let handle = self.handles.lock().await.get(&job_id).cloned();
        if let Some(handle) = handle {
            handle.finished().await;
        }
        self.get(job_id).await
    }

    /// Jobs the scheduler clones.
    pub async fn templates(&self) -> Vec<Job> {
        self.db
            .read(|state| state.jobs.iter().filter(|j| j.is_template()).cloned().collect())
            .await
    }

    /// Most recent cron occurrence cloned from a template.
    pub async fn last_fired(&self, template_id: Uuid) -> Option<DateTime<Utc>> {
        self.db.read(|s| s.last_fired(template_id)).await
    }

    /// Clone a template for one cron occurrence.
    ///
    /// Returns `None` when that occurrence already produced a clone. The
    /// template record is left as is; its watermark in the state moves to
    /// `fire` in the same transaction.
    pub async fn clone_template(
        &self,
        template_id: Uuid,
        fire: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let clone = self
            .db
            .transaction(|state| {
                let template = state
                    .job(template_id)
                    .ok_or_else(|| Error::not_found("Job", template_id))?
                    .clone();
                if state.last_fired(template_id).map_or(false, |last| fire <= last) {
                    return Ok(None);
                }
                state.fire_watermarks.insert(template_id, fire);

                let clone = Job {
                    id: Uuid::new_v4(),
                    name: format!("{} (scheduled {})", template.name, fire.format("%Y-%m-%d %H:%M")),
                    section: template.section.clone(),
                    patch: template.patch.clone(),
                    status: JobStatus::Pending,
                    rollback_on_failure: template.rollback_on_failure,
                    cron_expression: None,
                    schedule_enabled: false,
                    template_id: Some(template_id),
                    created_by: template.created_by.clone(),
                    created_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                };
                let device_ids: Vec<Uuid> = state
                    .targets_for(template_id)
                    .iter()
                    .map(|t| t.device_id)
                    .collect();
                insert_job(state, clone.clone(), &device_ids);
                Ok(Some(clone))
            })
            .await?;

        if let Some(ref job) = clone {
            tracing::info!("Cloned template {} into job {} '{}'", template_id, job.id, job.name);
            self.audit.record(
                AuditEvent::new("schedule_bulk_job", "scheduler", "bulk_job", job.id)
                    .with_request(json!({"template_id": template_id, "fire_time": fire.to_rfc3339()})),
            );
        }
        Ok(clone)
    }

    /// Jobs left `queued` or `running` with no live worker in this process.
    pub async fn stale_jobs(&self) -> Vec<JobSummary> {
        let live: Vec<Uuid> = self
            .handles
            .lock()
            .await
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(id, _)| *id)
            .collect();

        self.db
            .read(|state| {
                state
                    .jobs
                    .iter()
                    .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
                    .filter(|j| !live.contains(&j.id))
                    .map(|j| JobSummary::from_parts(j, &state.targets_for(j.id)))
                    .collect()
            })
            .await
    }

    async fn is_cancelled(&self, job_id: Uuid) -> bool {
        self.db
            .read(|s| s.job(job_id).map(|j| j.status == JobStatus::Cancelled))
            .await
            .unwrap_or(true)
    }

    async fn log(&self, job_id: Uuid, level: LogLevel, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.db
            .transaction(move |state| {
                push_log(state, job_id, level, message);
                Ok(())
            })
            .await
    }
}

fn validate(new_job: &NewJob) -> Result<()> {
    if new_job.name.trim().is_empty() {
        return Err(Error::InvalidJob("name must not be empty".to_string()));
    }
    if new_job.section.trim().is_empty() {
        return Err(Error::InvalidJob("section must not be empty".to_string()));
    }
    if new_job.device_ids.is_empty() {
        return Err(Error::InvalidJob("at least one device is required".to_string()));
    }
    if let Some(ref expr) = new_job.cron_expression {
        CronExpr::parse(expr)?;
    }
    Ok(())
}

fn insert_job(state: &mut State, job: Job, device_ids: &[Uuid]) {
    let job_id = job.id;
    state.jobs.push(job);
    state
        .targets
        .extend(device_ids.iter().map(|device_id| Target::pending(job_id, *device_id)));
    push_log(
        state,
        job_id,
        LogLevel::Info,
        format!("Job created with {} targets", device_ids.len()),
    );
}

fn push_log(state: &mut State, job_id: Uuid, level: LogLevel, message: impl Into<String>) {
    state.logs.push(JobLog {
        id: Uuid::new_v4(),
        job_id,
        level,
        message: message.into(),
        created_at: Utc::now(),
    });
}

fn detail(state: &State, job_id: Uuid) -> Result<JobDetail> {
    let job = state
        .job(job_id)
        .ok_or_else(|| Error::not_found("Job", job_id))?
        .clone();
    let targets = state.targets_for(job_id);
    Ok(JobDetail {
        summary: JobSummary::from_parts(&job, &targets),
        job,
        targets,
        logs: state.logs_for(job_id),
    })
}

/// Push a full configuration; fall back to re-applying the section when the
/// client cannot restore.
/// Push `full` back, or re-apply `before` as a patch when the client cannot
/// restore. Returns whether the patch fallback was used.
async fn restore_or_reapply(
    client: &dyn DeviceClient,
    device: &Device,
    section: &str,
    full: &ConfigTree,
    before: &Value,
) -> Result<bool> {
    match client.restore(device, full).await {
        Ok(result) if result.success => Ok(false),
        Ok(result) => Err(Error::Device(result.message)),
        Err(Error::Unsupported(_)) => {
            let result = client.apply(device, section, before).await?;
            if result.success {
                Ok(true)
            } else {
                Err(Error::Device(result.message))
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockDeviceClient;

    async fn setup() -> (JobOrchestrator, Arc<MockDeviceClient>, Vec<Device>) {
        let db = Arc::new(Database::in_memory());
        let devices = vec![
            Device::new("fw-1", "mock", "10.0.0.1", 443),
            Device::new("fw-2", "mock", "10.0.0.2", 443),
        ];
        let stored = devices.clone();
        db.transaction(|s| {
            s.devices.extend(stored);
            Ok(())
        })
        .await
        .unwrap();

        let mock = Arc::new(MockDeviceClient::new());
        let clients = ClientRegistry::new().with("mock", mock.clone());
        (JobOrchestrator::new(db, Arc::new(clients)), mock, devices)
    }

    fn ntp_job(device_ids: Vec<Uuid>) -> NewJob {
        NewJob {
            name: "ntp rollout".to_string(),
            section: "ntp".to_string(),
            patch: json!({"servers": ["10.1.1.1"]}),
            device_ids,
            created_by: "ops".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (orch, _, devices) = setup().await;

        let mut job = ntp_job(vec![devices[0].id]);
        job.name = "  ".to_string();
        assert!(matches!(orch.create(job).await, Err(Error::InvalidJob(_))));

        let mut job = ntp_job(vec![devices[0].id]);
        job.cron_expression = Some("not a cron".to_string());
        assert!(matches!(orch.create(job).await, Err(Error::Cron { .. })));

        assert!(orch.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_dedupes_targets() {
        let (orch, _, devices) = setup().await;
        let job = orch
            .create(ntp_job(vec![devices[0].id, devices[0].id, devices[1].id]))
            .await
            .unwrap();

        let detail = orch.get(job.id).await.unwrap();
        assert_eq!(detail.targets.len(), 2);
        assert!(detail.targets.iter().all(|t| t.status == TargetStatus::Pending));
    }

    #[tokio::test]
    async fn test_execute_only_from_pending() {
        let (orch, _, devices) = setup().await;
        let job = orch.create(ntp_job(vec![devices[0].id])).await.unwrap();

        orch.execute(job.id).await.unwrap();
        let err = orch.execute(job.id).await.unwrap_err();
        assert!(err.to_string().contains("Job is already"));

        let detail = orch.wait(job.id).await.unwrap();
        assert_eq!(detail.job.status, JobStatus::Completed);
        assert!(detail.job.started_at.is_some());
        assert!(detail.job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_successful_target_is_snapshotted() {
        let (orch, mock, devices) = setup().await;
        let job = orch.create(ntp_job(vec![devices[0].id])).await.unwrap();
        orch.execute(job.id).await.unwrap();
        let detail = orch.wait(job.id).await.unwrap();

        let target = &detail.targets[0];
        assert_eq!(target.status, TargetStatus::Success);
        assert_eq!(target.after.as_ref().unwrap()["servers"], json!(["10.1.1.1"]));
        assert!(target.diff.as_ref().unwrap().get("items_added").is_some());

        let snap = orch.snapshots().latest(devices[0].id, "ntp").await.unwrap();
        assert_eq!(snap.trigger, SnapshotTrigger::BulkApply);
        assert_eq!(snap.version, 1);
        assert_eq!(Some(&snap.data), target.after.as_ref());
        assert_eq!(mock.apply_calls(devices[0].id).await, 1);
    }

    #[tokio::test]
    async fn test_missing_device_fails_without_contact() {
        let (orch, _, devices) = setup().await;
        let ghost = Uuid::new_v4();
        let job = orch.create(ntp_job(vec![devices[0].id, ghost])).await.unwrap();
        orch.execute(job.id).await.unwrap();
        let detail = orch.wait(job.id).await.unwrap();

        assert_eq!(detail.job.status, JobStatus::Partial);
        let failed = detail.targets.iter().find(|t| t.device_id == ghost).unwrap();
        assert_eq!(failed.error.as_deref(), Some("Device not found"));
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_fails() {
        let (orch, _, devices) = setup().await;
        let job = orch.create(ntp_job(vec![devices[0].id])).await.unwrap();

        let cancelled = orch.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(matches!(orch.cancel(job.id).await, Err(Error::InvalidState(_))));
        assert!(matches!(orch.execute(job.id).await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (orch, _, devices) = setup().await;
        let job = orch.create(ntp_job(vec![devices[0].id])).await.unwrap();
        orch.delete(job.id).await.unwrap();

        assert!(matches!(orch.get(job.id).await, Err(Error::NotFound { .. })));
        let leftovers = orch
            .db
            .read(|s| s.targets.len() + s.logs.len())
            .await;
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_clone_template_once_per_occurrence() {
        let (orch, _, devices) = setup().await;
        let mut new_job = ntp_job(vec![devices[0].id, devices[1].id]);
        new_job.cron_expression = Some("* * * * *".to_string());
        new_job.schedule_enabled = true;
        let template = orch.create(new_job).await.unwrap();

        let fire = Utc::now();
        let clone = orch.clone_template(template.id, fire).await.unwrap().unwrap();
        assert_eq!(clone.template_id, Some(template.id));
        assert!(!clone.is_template());
        assert_eq!(orch.get(clone.id).await.unwrap().targets.len(), 2);

        assert!(orch.clone_template(template.id, fire).await.unwrap().is_none());
        let stored = orch.get(template.id).await.unwrap().job;
        assert_eq!(stored.status, JobStatus::Pending);
    }
}
