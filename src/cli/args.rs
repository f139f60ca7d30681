//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fleet Orchestrator - Versioned configuration management for firewall fleets
#[derive(Parser, Debug)]
#[command(name = "fleet-orchestrator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config.toml (default: user config directory)
    #[arg(long, global = true, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage devices
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Snapshots, baselines and restores
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Bulk patch jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Check devices for drift against their baseline
    Drift {
        /// Device name or id (default: all devices)
        #[arg(value_name = "DEVICE")]
        device: Option<String>,
    },

    /// Run one scheduler tick now
    Tick,

    /// Run the scheduler, drift checks and auto-backups until interrupted
    Daemon,
}

#[derive(Subcommand, Debug)]
pub enum DeviceAction {
    /// Register a device
    Add {
        /// Device name
        #[arg(value_name = "NAME")]
        name: String,

        /// Management address
        #[arg(long, value_name = "IP")]
        ip: String,

        /// Management port
        #[arg(long, default_value_t = 443)]
        port: u16,

        /// Device client kind (mock, http)
        #[arg(long, default_value = "mock")]
        adapter: String,

        /// Enable scheduled auto-backup
        #[arg(long)]
        auto_backup: bool,

        /// Hours between auto-backups
        #[arg(long, value_name = "HOURS")]
        interval_hours: Option<u32>,

        /// Snapshots to keep per device (default: keep all)
        #[arg(long, value_name = "N")]
        retention: Option<usize>,
    },

    /// Change the backup settings of a device
    Settings {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Turn scheduled auto-backup on or off
        #[arg(long, value_name = "BOOL")]
        auto_backup: Option<bool>,

        /// Hours between auto-backups
        #[arg(long, value_name = "HOURS")]
        interval_hours: Option<u32>,

        /// Snapshots to keep per device
        #[arg(long, value_name = "N", conflicts_with = "keep_all")]
        retention: Option<usize>,

        /// Keep every snapshot
        #[arg(long)]
        keep_all: bool,
    },

    /// List devices
    List,

    /// Remove a device and its snapshots
    Remove {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Fetch and store the full configuration of a device
    Sync {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Free-text label
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List snapshots of a device
    List {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Only this section
        #[arg(short, long)]
        section: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print a snapshot
    Show {
        #[arg(value_name = "SNAPSHOT_ID")]
        snapshot_id: String,
    },

    /// Mark a snapshot as the drift baseline
    Baseline {
        #[arg(value_name = "SNAPSHOT_ID")]
        snapshot_id: String,
    },

    /// Push a snapshot back to a device
    Restore {
        #[arg(value_name = "SNAPSHOT_ID")]
        snapshot_id: String,

        /// Restore onto another device
        #[arg(long, value_name = "DEVICE")]
        to: Option<String>,
    },

    /// Push a configuration file to a device
    Upload {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,

        /// JSON configuration file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long)]
        label: Option<String>,
    },

    /// Export all snapshots of a device to a zip archive
    Export {
        /// Device name or id
        #[arg(value_name = "DEVICE")]
        device: String,

        /// Output file path (default: auto-generated with timestamp)
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Diff two or more snapshots
    Compare {
        #[arg(value_name = "SNAPSHOT_ID", num_args = 2..)]
        snapshot_ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum JobAction {
    /// Create a bulk job
    Create {
        /// Job name
        #[arg(value_name = "NAME")]
        name: String,

        /// Configuration section to patch
        #[arg(short, long)]
        section: String,

        /// Patch as inline JSON
        #[arg(long, conflicts_with = "patch_file")]
        patch: Option<String>,

        /// Patch read from a JSON file
        #[arg(long, value_name = "FILE")]
        patch_file: Option<PathBuf>,

        /// Target devices (names or ids)
        #[arg(short, long, value_delimiter = ',', required = true)]
        devices: Vec<String>,

        /// Restore successful targets when any target fails
        #[arg(long)]
        rollback_on_failure: bool,

        /// Cron expression; makes the job a scheduled template
        #[arg(long, value_name = "EXPR")]
        cron: Option<String>,
    },

    /// List jobs
    List,

    /// Show a job with its targets and log
    Show {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Preview a job against the last known snapshots
    Preview {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Execute a pending job and wait for it
    Run {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Cancel a job
    Cancel {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// Delete a job
    Delete {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
}
