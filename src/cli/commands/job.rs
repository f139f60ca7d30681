//! Job command implementation.
//!
//! Creates bulk jobs, previews them and runs them with a progress bar.

use crate::cli::context::{parse_id, App};
use crate::core::Scheduler;
use crate::models::{JobDetail, JobStatus, LogLevel, NewJob, TargetStatus};
use crate::Result;
use chrono::Utc;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Options for `job create`.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub name: String,
    pub section: String,
    pub patch: Option<String>,
    pub patch_file: Option<PathBuf>,
    pub devices: Vec<String>,
    pub rollback_on_failure: bool,
    pub cron: Option<String>,
}

/// Create a job, or a scheduled template when a cron expression is given.
pub async fn create(app: &App, opts: CreateJob) -> Result<()> {
    let raw = match (opts.patch, opts.patch_file) {
        (Some(inline), _) => inline,
        (None, Some(path)) => fs::read_to_string(&path)?,
        (None, None) => {
            return Err(crate::Error::InvalidArgument(
                "either --patch or --patch-file is required".to_string(),
            ))
        }
    };
    let patch: serde_json::Value = serde_json::from_str(&raw)?;

    let mut device_ids = Vec::with_capacity(opts.devices.len());
    for key in &opts.devices {
        device_ids.push(app.device(key).await?.id);
    }

    let job = app
        .orchestrator
        .create(NewJob {
            name: opts.name,
            section: opts.section,
            patch,
            device_ids,
            rollback_on_failure: opts.rollback_on_failure,
            schedule_enabled: opts.cron.is_some(),
            cron_expression: opts.cron,
            created_by: app.actor.clone(),
        })
        .await?;

    println!("{} {} ({})", "[OK] Job created:".bold().green(), job.name, job.id);
    if let Some(next) = Scheduler::next_fire(&job, Utc::now()) {
        println!("  {} {}", "Next run:".bold(), next.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

/// List all jobs.
pub async fn list(app: &App) -> Result<()> {
    println!("{}", "Jobs".bold().cyan());
    println!();

    let jobs = app.orchestrator.list().await;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<28} {:<12} {:<10} {:<8} {}",
        "Id".bold(),
        "Name".bold(),
        "Section".bold(),
        "Status".bold(),
        "Ok/Fail".bold(),
        "Created".bold()
    );
    println!("{}", "-".repeat(120));

    for job in jobs {
        println!(
            "{:<38} {:<28} {:<12} {:<10} {:<8} {}",
            job.id,
            truncate(&job.name, 27),
            job.section,
            colored_status(job.status),
            format!("{}/{}", job.success_count, job.failed_count),
            job.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Show a job with its targets and log.
pub async fn show(app: &App, job_id: &str) -> Result<()> {
    let detail = app.orchestrator.get(parse_id("job", job_id)?).await?;
    print_detail(&detail);
    Ok(())
}

/// Preview a job against the last known snapshots.
pub async fn preview(app: &App, job_id: &str) -> Result<()> {
    let previews = app.orchestrator.preview(parse_id("job", job_id)?).await?;

    println!("{}", "[PREVIEW] Based on last known snapshots".bold().cyan());
    println!();
    for preview in previews {
        println!("{} {}", "Device:".bold(), preview.device_name);
        if preview.diff.as_object().map_or(true, |m| m.is_empty()) {
            println!("  {}", "no changes".green());
        } else {
            println!("{}", serde_json::to_string_pretty(&preview.diff)?);
        }
        println!();
    }
    Ok(())
}

/// Execute a pending job and follow it to the end.
pub async fn run(app: &App, job_id: &str) -> Result<()> {
    let job_id = parse_id("job", job_id)?;
    let handle = app.orchestrator.execute(job_id).await?;

    println!("{}", "[EXEC] Executing job...".bold().cyan());
    println!();

    let total = app.orchestrator.get(job_id).await?.targets.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| crate::Error::other(e.to_string()))?
            .progress_chars("=>-"),
    );

    while !handle.is_finished() {
        let detail = app.orchestrator.get(job_id).await?;
        let done = detail
            .targets
            .iter()
            .filter(|t| t.status != TargetStatus::Pending)
            .count();
        pb.set_position(done as u64);
        if let Some(last) = detail.logs.last() {
            pb.set_message(last.message.clone());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let detail = app.orchestrator.wait(job_id).await?;
    pb.set_position(detail.targets.len() as u64);
    pb.finish_with_message("Done!");
    println!();

    println!("{}", "[Execution Summary]".bold().green());
    println!("  {} {}", "Status:".bold(), colored_status(detail.job.status));
    println!("  {} {}", "Successful targets:".bold(), detail.summary.success_count);
    println!("  {} {}", "Failed targets:".bold(), detail.summary.failed_count);
    for target in detail.targets.iter().filter(|t| t.status == TargetStatus::Failed) {
        println!(
            "    {} {}: {}",
            "x".red(),
            target.device_id,
            target.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Cancel a job.
pub async fn cancel(app: &App, job_id: &str) -> Result<()> {
    let job = app.orchestrator.cancel(parse_id("job", job_id)?).await?;
    println!("{} {}", "[OK] Job cancelled:".bold().green(), job.name);
    Ok(())
}

/// Delete a job.
pub async fn delete(app: &App, job_id: &str) -> Result<()> {
    app.orchestrator.delete(parse_id("job", job_id)?).await?;
    println!("{}", "[OK] Job deleted".bold().green());
    Ok(())
}

fn print_detail(detail: &JobDetail) {
    let job = &detail.job;
    println!("{} {}", "Job:".bold().cyan(), job.name);
    println!("  {} {}", "Id:".bold(), job.id);
    println!("  {} {}", "Section:".bold(), job.section);
    println!("  {} {}", "Status:".bold(), colored_status(job.status));
    println!("  {} {}", "Created by:".bold(), job.created_by);
    println!("  {} {}", "Rollback on failure:".bold(), job.rollback_on_failure);
    if let Some(ref cron) = job.cron_expression {
        println!(
            "  {} {} ({})",
            "Schedule:".bold(),
            cron,
            if job.schedule_enabled { "enabled" } else { "disabled" }
        );
    }
    if let Some(template_id) = job.template_id {
        println!("  {} {}", "Template:".bold(), template_id);
    }
    println!();

    println!("{}", "Targets:".bold());
    for target in &detail.targets {
        let status = match target.status {
            TargetStatus::Pending => "pending".normal(),
            TargetStatus::Success => "success".green(),
            TargetStatus::Failed => "failed".red(),
        };
        println!(
            "  {} {} {}",
            target.device_id,
            status,
            target.error.as_deref().unwrap_or("")
        );
    }
    println!();

    println!("{}", "Log:".bold());
    for line in &detail.logs {
        let level = match line.level {
            LogLevel::Info => "INFO ".normal(),
            LogLevel::Warning => "WARN ".yellow(),
            LogLevel::Error => "ERROR".red(),
        };
        println!(
            "  {} {} {}",
            line.created_at.format("%H:%M:%S"),
            level,
            line.message
        );
    }
}

fn colored_status(status: JobStatus) -> String {
    let text = status.to_string();
    match status {
        JobStatus::Completed => text.green().to_string(),
        JobStatus::Partial => text.yellow().to_string(),
        JobStatus::Failed => text.red().to_string(),
        JobStatus::Cancelled => text.dimmed().to_string(),
        _ => text.cyan().to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
