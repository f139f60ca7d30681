//! Configuration model.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the persisted state.
    pub data_dir: PathBuf,
    /// Scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Job execution configuration.
    pub orchestrator: OrchestratorConfig,
    /// Drift check configuration.
    pub drift: DriftConfig,
    /// Device HTTP client configuration.
    pub http: HttpConfig,
    /// Alert delivery configuration.
    pub alerts: AlertsConfig,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks in daemon mode.
    pub tick_secs: u64,
    /// How late a tick may observe a cron occurrence and still fire it.
    pub grace_secs: i64,
    /// Seconds between scheduled backup checks.
    pub backup_check_secs: u64,
}

/// Job execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs running at the same time.
    pub max_concurrent_jobs: usize,
}

/// Drift check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Seconds between drift checks in daemon mode.
    pub interval_secs: u64,
}

/// Device HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Webhook receiving alert events; alerts are only logged when unset.
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs_config_path().join("data"),
            scheduler: SchedulerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            drift: DriftConfig::default(),
            http: HttpConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            grace_secs: 60,
            backup_check_secs: 900,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Get the configuration directory path.
pub fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleet_orchestrator")
}

/// Load configuration from the default location.
///
/// Environment variables override file values:
/// - `FLEET_DATA_DIR`: state directory
/// - `FLEET_ALERT_WEBHOOK`: alert webhook URL
pub fn load_config() -> Config {
    let config_path = dirs_config_path().join("config.toml");

    let mut config = if config_path.exists() {
        match load_config_from(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {:?}: {}", config_path, e);
                Config::default()
            }
        }
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);
    config
}

/// Load configuration from a TOML file.
pub fn load_config_from(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(dir) = std::env::var("FLEET_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Ok(url) = std::env::var("FLEET_ALERT_WEBHOOK") {
        if !url.is_empty() {
            config.alerts.webhook_url = Some(url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.grace_secs, 60);
        assert_eq!(config.orchestrator.max_concurrent_jobs, 4);
        assert!(config.alerts.webhook_url.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "data_dir = \"/var/lib/fleet\"\n\n[scheduler]\ngrace_secs = 90\n",
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/fleet"));
        assert_eq!(config.scheduler.grace_secs, 90);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = [").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
