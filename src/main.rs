//! Fleet Orchestrator CLI
//!
//! A command-line tool for versioned configuration management of firewall fleets.

use clap::Parser;
use fleet_orchestrator::cli::{
    args::{BackupAction, Cli, Commands, DeviceAction, JobAction},
    commands::{backup, daemon, device, drift, job},
    context::App,
};
use fleet_orchestrator::models::config::{load_config, load_config_from};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Load configuration
    let mut config = match cli.config {
        Some(ref path) => load_config_from(path)?,
        None => load_config(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tracing::debug!("Using data directory {:?}", config.data_dir);

    let app = App::open(config)?;

    // Run the appropriate command
    match cli.command {
        Commands::Device { action } => match action {
            DeviceAction::Add {
                name,
                ip,
                port,
                adapter,
                auto_backup,
                interval_hours,
                retention,
            } => {
                device::add_device(
                    &app,
                    device::AddDevice {
                        name,
                        ip,
                        port,
                        adapter,
                        auto_backup,
                        interval_hours,
                        retention,
                    },
                )
                .await?;
            }
            DeviceAction::Settings {
                device: key,
                auto_backup,
                interval_hours,
                retention,
                keep_all,
            } => {
                device::update_settings(
                    &app,
                    &key,
                    device::SettingsChange {
                        auto_backup,
                        interval_hours,
                        retention,
                        keep_all,
                    },
                )
                .await?;
            }
            DeviceAction::List => device::list_devices(&app).await?,
            DeviceAction::Remove { device } => device::remove_device(&app, &device).await?,
        },

        Commands::Backup { action } => match action {
            BackupAction::Sync { device, label } => {
                backup::sync(&app, &device, label.as_deref()).await?;
            }
            BackupAction::List {
                device,
                section,
                limit,
                offset,
            } => {
                backup::list(&app, &device, section.as_deref(), limit, offset).await?;
            }
            BackupAction::Show { snapshot_id } => backup::show(&app, &snapshot_id).await?,
            BackupAction::Baseline { snapshot_id } => {
                backup::baseline(&app, &snapshot_id).await?;
            }
            BackupAction::Restore { snapshot_id, to } => {
                backup::restore(&app, &snapshot_id, to.as_deref()).await?;
            }
            BackupAction::Upload {
                device,
                file,
                label,
            } => {
                backup::upload(&app, &device, &file, label.as_deref()).await?;
            }
            BackupAction::Export { device, output } => {
                backup::export(&app, &device, output.as_deref()).await?;
            }
            BackupAction::Compare { snapshot_ids } => {
                backup::compare(&app, &snapshot_ids).await?;
            }
        },

        Commands::Job { action } => match action {
            JobAction::Create {
                name,
                section,
                patch,
                patch_file,
                devices,
                rollback_on_failure,
                cron,
            } => {
                job::create(
                    &app,
                    job::CreateJob {
                        name,
                        section,
                        patch,
                        patch_file,
                        devices,
                        rollback_on_failure,
                        cron,
                    },
                )
                .await?;
            }
            JobAction::List => job::list(&app).await?,
            JobAction::Show { job_id } => job::show(&app, &job_id).await?,
            JobAction::Preview { job_id } => job::preview(&app, &job_id).await?,
            JobAction::Run { job_id } => job::run(&app, &job_id).await?,
            JobAction::Cancel { job_id } => job::cancel(&app, &job_id).await?,
            JobAction::Delete { job_id } => job::delete(&app, &job_id).await?,
        },

        Commands::Drift { device } => {
            drift::check(&app, device.as_deref()).await?;
        }

        Commands::Tick => {
            daemon::tick(&app).await?;
        }

        Commands::Daemon => {
            daemon::run(&app).await?;
        }
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("fleet_orchestrator=debug,audit=info")
    } else {
        EnvFilter::new("fleet_orchestrator=info,audit=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
