//! Drift command implementation.

use crate::cli::context::App;
use crate::core::DriftOutcome;
use crate::Result;
use colored::Colorize;

/// Check one device, or all of them.
pub async fn check(app: &App, device: Option<&str>) -> Result<()> {
    println!("{}", "[DRIFT] Checking against baselines...".bold().cyan());
    println!();

    let results = match device {
        Some(key) => {
            let device = app.device(key).await?;
            vec![(device.id, app.drift.check(device.id).await?)]
        }
        None => app.drift.check_all().await,
    };

    let devices = app.devices.list().await;
    for (id, outcome) in results {
        let name = devices
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| id.to_string());
        let flagged = devices.iter().any(|d| d.id == id && d.drift_detected);

        let status = match outcome {
            DriftOutcome::NoBaseline => "no baseline".dimmed(),
            DriftOutcome::Detected => "drift detected".red().bold(),
            DriftOutcome::Resolved => "drift resolved".green(),
            DriftOutcome::Unchanged if flagged => "drifted".red(),
            DriftOutcome::Unchanged => "in sync".green(),
        };
        println!("  {:<24} {}", name, status);
    }
    Ok(())
}
