//! Scheduler tick and daemon loop.

use crate::cli::context::App;
use crate::Result;
use chrono::Utc;
use colored::Colorize;
use std::time::Duration;

/// Run one scheduler tick and wait for the dispatched jobs.
pub async fn tick(app: &App) -> Result<()> {
    let report = app.scheduler.tick(Utc::now()).await;

    if report.cloned.is_empty() {
        println!("No templates due.");
    }
    for job_id in &report.cloned {
        let detail = app.orchestrator.wait(*job_id).await?;
        println!(
            "{} {} -> {}",
            "[OK] Dispatched".bold().green(),
            detail.job.name,
            detail.job.status
        );
    }
    if report.skipped > 0 {
        println!(
            "{} {} templates skipped, see log",
            "[WARNING]".bold().yellow(),
            report.skipped
        );
    }
    Ok(())
}

/// Run scheduler ticks, drift checks and auto-backup checks until Ctrl-C.
pub async fn run(app: &App) -> Result<()> {
    println!("{}", "[DAEMON] Fleet orchestrator running (Ctrl-C to stop)".bold().cyan());

    for stale in app.orchestrator.stale_jobs().await {
        tracing::warn!(
            "Job {} '{}' was left {} by a previous run and will not resume",
            stale.id,
            stale.name,
            stale.status
        );
    }

    let cfg = &app.config;
    let mut ticks = tokio::time::interval(Duration::from_secs(cfg.scheduler.tick_secs.max(1)));
    let mut drift = tokio::time::interval(Duration::from_secs(cfg.drift.interval_secs.max(1)));
    let mut backups =
        tokio::time::interval(Duration::from_secs(cfg.scheduler.backup_check_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let report = app.scheduler.tick(Utc::now()).await;
                tracing::debug!("Tick: {} dispatched, {} skipped", report.cloned.len(), report.skipped);
            }
            _ = drift.tick() => {
                let results = app.drift.check_all().await;
                tracing::debug!("Drift check covered {} devices", results.len());
            }
            _ = backups.tick() => {
                app.backups.scheduled_check(Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
