//! Cron-driven job cloning.
//!
//! On each tick every template whose expression fired within the grace
//! window is cloned and the clone executed. Each template remembers the last
//! occurrence it fired for, so overlapping ticks never clone twice.

use crate::core::cron::CronExpr;
use crate::core::orchestrator::JobOrchestrator;
use crate::error::{Error, IgnoredKind};
use crate::models::Job;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Default grace window in seconds.
pub const DEFAULT_GRACE_SECS: i64 = 60;

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Ids of the clones created and dispatched.
    pub cloned: Vec<Uuid>,
    /// Templates skipped because of errors.
    pub skipped: usize,
}

pub struct Scheduler {
    orchestrator: JobOrchestrator,
    grace: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self::with_grace(orchestrator, DEFAULT_GRACE_SECS)
    }

    pub fn with_grace(orchestrator: JobOrchestrator, grace_secs: i64) -> Self {
        Self {
            orchestrator,
            grace: Duration::seconds(grace_secs),
        }
    }

    /// Evaluate every template at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let templates = self.orchestrator.templates().await;
        tracing::debug!("Scheduler tick at {} ({} templates)", now, templates.len());

        for template in templates {
            match self.fire_if_due(&template, now).await {
                Ok(Some(clone_id)) => report.cloned.push(clone_id),
                Ok(None) => {}
                Err(e) => {
                    Error::ignored(
                        IgnoredKind::Schedule,
                        format!("template {} '{}': {}", template.id, template.name, e),
                    )
                    .log_ignored();
                    report.skipped += 1;
                }
            }
        }

        if !report.cloned.is_empty() {
            tracing::info!("Scheduler dispatched {} jobs", report.cloned.len());
        }
        report
    }

    async fn fire_if_due(&self, template: &Job, now: DateTime<Utc>) -> crate::Result<Option<Uuid>> {
        let Some(ref expr) = template.cron_expression else {
            return Ok(None);
        };
        let cron = CronExpr::parse(expr)?;

        let Some(fire) = cron.prev_fire(now) else {
            return Ok(None);
        };
        if now - fire > self.grace {
            return Ok(None);
        }
        let last = self.orchestrator.last_fired(template.id).await;
        if last.map_or(false, |last| fire <= last) {
            return Ok(None);
        }

        let Some(clone) = self.orchestrator.clone_template(template.id, fire).await? else {
            return Ok(None);
        };
        self.orchestrator.execute(clone.id).await?;
        tracing::info!("Template '{}' fired for {}, dispatched {}", template.name, fire, clone.id);
        Ok(Some(clone.id))
    }

    /// Next fire time of a template after `now`, for display.
    pub fn next_fire(template: &Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expr = template.cron_expression.as_deref()?;
        CronExpr::parse(expr).ok()?.next_after(now)
    }
}
