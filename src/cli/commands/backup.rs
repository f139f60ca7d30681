//! Backup command implementation.
//!
//! Snapshot listing, baselines, restores and archive export.

use crate::cli::context::{parse_id, App};
use crate::models::SnapshotTrigger;
use crate::Result;
use chrono::Utc;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Fetch and store the full configuration of a device.
pub async fn sync(app: &App, device: &str, label: Option<&str>) -> Result<()> {
    let device = app.device(device).await?;
    println!("{} {}", "[SYNC] Fetching configuration from".bold().cyan(), device.name);

    let snapshot = app
        .backups
        .sync(device.id, SnapshotTrigger::Manual, label, &app.actor)
        .await?;

    println!(
        "{} v{} ({}, {} bytes)",
        "[OK] Snapshot stored:".bold().green(),
        snapshot.version,
        &snapshot.checksum[..12],
        snapshot.size()
    );
    println!("  {} {}", "Id:".bold(), snapshot.id);
    Ok(())
}

/// List snapshots of a device, newest first.
pub async fn list(
    app: &App,
    device: &str,
    section: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let device = app.device(device).await?;
    println!("{} {}", "Snapshots of".bold().cyan(), device.name);
    println!();

    let snapshots = app.snapshots.list(device.id, section, limit, offset).await;
    if snapshots.is_empty() {
        println!("No snapshots found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<14} {:<5} {:<12} {:<20} {}",
        "Id".bold(),
        "Section".bold(),
        "Ver".bold(),
        "Trigger".bold(),
        "Created".bold(),
        "Label".bold()
    );
    println!("{}", "-".repeat(110));

    for snap in snapshots {
        let marker = if snap.is_baseline { " *".yellow().to_string() } else { String::new() };
        println!(
            "{:<38} {:<14} {:<5} {:<12} {:<20} {}{}",
            snap.id,
            snap.section,
            snap.version,
            snap.trigger.to_string(),
            snap.created_at.format("%Y-%m-%d %H:%M:%S"),
            snap.label.unwrap_or_default(),
            marker
        );
    }

    println!();
    println!("{}", "* = baseline".dimmed());
    Ok(())
}

/// Print a snapshot with its data.
pub async fn show(app: &App, snapshot_id: &str) -> Result<()> {
    let snapshot = app.snapshots.get(parse_id("snapshot", snapshot_id)?).await?;

    println!("{} {}", "Snapshot:".bold().cyan(), snapshot.id);
    println!("  {} {}", "Device:".bold(), snapshot.device_id);
    println!("  {} {} v{}", "Section:".bold(), snapshot.section, snapshot.version);
    println!("  {} {}", "Trigger:".bold(), snapshot.trigger);
    println!("  {} {}", "Checksum:".bold(), snapshot.checksum);
    println!("  {} {}", "Baseline:".bold(), snapshot.is_baseline);
    println!("  {} {}", "Created:".bold(), snapshot.created_at);
    println!();
    println!("{}", serde_json::to_string_pretty(&snapshot.data)?);
    Ok(())
}

/// Mark a snapshot as the drift baseline.
pub async fn baseline(app: &App, snapshot_id: &str) -> Result<()> {
    let snapshot = app
        .snapshots
        .set_baseline(parse_id("snapshot", snapshot_id)?)
        .await?;
    println!(
        "{} {} v{}",
        "[OK] Baseline set:".bold().green(),
        snapshot.section,
        snapshot.version
    );
    Ok(())
}

/// Push a snapshot back to its device or another one.
pub async fn restore(app: &App, snapshot_id: &str, to: Option<&str>) -> Result<()> {
    let target = match to {
        Some(key) => Some(app.device(key).await?.id),
        None => None,
    };

    println!("{}", "[WARNING] This replaces the live device configuration!".bold().yellow());
    let outcome = app
        .backups
        .restore(parse_id("snapshot", snapshot_id)?, target, &app.actor)
        .await?;

    println!("{} {}", "[OK] Restored:".bold().green(), outcome.message);
    println!(
        "  {} {}",
        "Pre-restore snapshot:".bold(),
        outcome.pre_restore_snapshot_id
    );
    Ok(())
}

/// Push a JSON configuration file to a device.
pub async fn upload(app: &App, device: &str, file: &Path, label: Option<&str>) -> Result<()> {
    let device = app.device(device).await?;
    let content = fs::read_to_string(file)?;
    let config: serde_json::Value = serde_json::from_str(&content)?;

    println!("{}", "[WARNING] This replaces the live device configuration!".bold().yellow());
    let outcome = app
        .backups
        .upload_restore(device.id, config, label, &app.actor)
        .await?;

    println!("{} {}", "[OK] Uploaded:".bold().green(), outcome.message);
    println!(
        "  {} {}",
        "Pre-restore snapshot:".bold(),
        outcome.pre_restore_snapshot_id
    );
    match outcome.snapshot_id {
        Some(id) => println!("  {} {}", "Upload snapshot:".bold(), id),
        None => println!("  {}", "Upload snapshot was not stored".yellow()),
    }
    Ok(())
}

/// Export every snapshot of a device to a zip archive.
pub async fn export(app: &App, device: &str, output: Option<&Path>) -> Result<()> {
    let device = app.device(device).await?;
    let output_path = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(format!(
            "{}_snapshots_{}.zip",
            device.name,
            Utc::now().format("%Y%m%d_%H%M%S")
        )),
    };

    let manifest = app.snapshots.export(device.id, &output_path).await?;
    println!(
        "{} {} snapshots to {}",
        "[OK] Exported".bold().green(),
        manifest.snapshots.len(),
        output_path.display()
    );
    Ok(())
}

/// Diff snapshots pairwise.
pub async fn compare(app: &App, snapshot_ids: &[String]) -> Result<()> {
    let ids = snapshot_ids
        .iter()
        .map(|raw| parse_id("snapshot", raw))
        .collect::<Result<Vec<_>>>()?;
    let comparison = app.snapshots.compare(&ids).await?;

    for pair in &comparison.diffs {
        println!("{} {} -> {}", "Diff".bold().cyan(), pair.from, pair.to);
        if pair.diff.as_object().map_or(true, |m| m.is_empty()) {
            println!("  {}", "identical".green());
        } else {
            println!("{}", serde_json::to_string_pretty(&pair.diff)?);
        }
        println!();
    }
    Ok(())
}
