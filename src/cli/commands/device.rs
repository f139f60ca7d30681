//! Device command implementation.

use crate::cli::context::App;
use crate::models::Device;
use crate::Result;
use colored::Colorize;

/// Options for `device add`.
#[derive(Debug, Clone)]
pub struct AddDevice {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub adapter: String,
    pub auto_backup: bool,
    pub interval_hours: Option<u32>,
    pub retention: Option<usize>,
}

/// Register a device.
pub async fn add_device(app: &App, opts: AddDevice) -> Result<()> {
    let mut device = Device::new(&opts.name, &opts.adapter, &opts.ip, opts.port);
    device.backup.auto_backup_enabled = opts.auto_backup;
    if let Some(hours) = opts.interval_hours {
        device.backup.interval_hours = hours;
    }
    if let Some(keep) = opts.retention {
        if keep == 0 {
            return Err(crate::Error::InvalidArgument(
                "retention must keep at least one snapshot".to_string(),
            ));
        }
        device.backup.retention = Some(keep);
    }

    let device = app.devices.add(device, &app.actor).await?;
    println!("{} {} ({})", "[OK] Device added:".bold().green(), device.name, device.id);
    Ok(())
}

/// Options for `device settings`. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SettingsChange {
    pub auto_backup: Option<bool>,
    pub interval_hours: Option<u32>,
    pub retention: Option<usize>,
    pub keep_all: bool,
}

/// Change the backup settings of a device.
pub async fn update_settings(app: &App, key: &str, change: SettingsChange) -> Result<()> {
    let device = app.device(key).await?;
    let mut settings = device.backup.clone();
    if let Some(enabled) = change.auto_backup {
        settings.auto_backup_enabled = enabled;
    }
    if let Some(hours) = change.interval_hours {
        settings.interval_hours = hours;
    }
    if change.keep_all {
        settings.retention = None;
    } else if change.retention.is_some() {
        settings.retention = change.retention;
    }

    let device = app.devices.update_backup(device.id, settings, &app.actor).await?;
    let backup = &device.backup;
    println!("{} {}", "[OK] Backup settings updated:".bold().green(), device.name);
    println!(
        "  auto-backup: {}",
        if backup.auto_backup_enabled { "on" } else { "off" }
    );
    println!("  interval:    {}h", backup.interval_hours);
    match backup.retention {
        Some(keep) => println!("  retention:   {} snapshots", keep),
        None => println!("  retention:   keep all"),
    }
    Ok(())
}

/// List all devices.
pub async fn list_devices(app: &App) -> Result<()> {
    println!("{}", "Devices".bold().cyan());
    println!();

    let devices = app.devices.list().await;
    if devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<22} {:<12} {}",
        "Name".bold(),
        "Adapter".bold(),
        "Address".bold(),
        "Auto-backup".bold(),
        "Drift".bold()
    );
    println!("{}", "-".repeat(80));

    for device in devices {
        let drift = if device.drift_detected {
            "DRIFT".red().to_string()
        } else {
            "ok".green().to_string()
        };
        let backup = if device.backup.auto_backup_enabled {
            format!("every {}h", device.backup.interval_hours)
        } else {
            "off".to_string()
        };
        println!(
            "{:<20} {:<8} {:<22} {:<12} {}",
            device.name,
            device.adapter,
            format!("{}:{}", device.mgmt_ip, device.port),
            backup,
            drift
        );
    }

    Ok(())
}

/// Remove a device and its snapshots.
pub async fn remove_device(app: &App, key: &str) -> Result<()> {
    let device = app.device(key).await?;
    let removed = app.devices.remove(device.id, &app.actor).await?;
    println!(
        "{} {} ({} snapshots deleted)",
        "[OK] Device removed:".bold().green(),
        device.name,
        removed
    );
    Ok(())
}
