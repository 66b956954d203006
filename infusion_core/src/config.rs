//! Configuration file support for titrate.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/titrate/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Monitoring window parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,

    #[serde(default = "default_merge_tolerance_seconds")]
    pub merge_tolerance_seconds: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            cooldown_minutes: default_cooldown_minutes(),
            merge_tolerance_seconds: default_merge_tolerance_seconds(),
        }
    }
}

/// Calculation history configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// One week of readings is the most the monitor will keep
const MAX_RETENTION_HOURS: i64 = 24 * 7;

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("titrate")
}

fn default_retention_hours() -> i64 {
    24
}

fn default_cooldown_minutes() -> i64 {
    60
}

fn default_merge_tolerance_seconds() -> i64 {
    60
}

fn default_max_entries() -> usize {
    50
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject window settings the monitoring engine cannot use
    pub fn validate(&self) -> Result<()> {
        let m = &self.monitoring;
        if !(1..=MAX_RETENTION_HOURS).contains(&m.retention_hours) {
            return Err(Error::Config(format!(
                "retention_hours must be between 1 and {}",
                MAX_RETENTION_HOURS
            )));
        }
        if !(0..=MAX_RETENTION_HOURS * 60).contains(&m.cooldown_minutes) {
            return Err(Error::Config("cooldown_minutes is out of range".into()));
        }
        if !(0..=3600).contains(&m.merge_tolerance_seconds) {
            return Err(Error::Config("merge_tolerance_seconds is out of range".into()));
        }
        if self.history.max_entries == 0 {
            return Err(Error::Config("max_entries must be at least 1".into()));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("titrate").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
