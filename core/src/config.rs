//! Configuration management for refresh, docker and display defaults.
//!
//! Stores configuration in JSON format at `~/.portview/config.json`.
//! Every field has a default, so a missing or partial file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Shortest refresh interval a session may use.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Column name → color name, consumed by the CLI renderer.
pub type ColorConfig = BTreeMap<String, String>;

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Watch refresh interval in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Enrich results with container publishes by default.
    #[serde(default)]
    pub docker: bool,

    /// Include non-listening sockets by default.
    #[serde(default)]
    pub show_all: bool,

    /// Lines shown by container log previews and `container logs`.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,

    #[serde(default)]
    pub no_color: bool,

    #[serde(default)]
    pub colors: ColorConfig,
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_log_tail_lines() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            docker: false,
            show_all: false,
            log_tail_lines: default_log_tail_lines(),
            no_color: false,
            colors: ColorConfig::new(),
        }
    }
}

impl Config {
    /// The refresh interval, never below [`MIN_REFRESH_INTERVAL`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms).max(MIN_REFRESH_INTERVAL)
    }
}

/// Configuration store for reading and writing settings.
pub struct ConfigStore {
    /// Path to the configuration file.
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.portview/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        Ok(Self {
            config_path: home.join(".portview").join("config.json"),
        })
    }

    /// Create a config store with a custom path.
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> Result<&Path> {
        self.config_path.parent().ok_or_else(|| {
            Error::Config(format!(
                "Config path {} has no parent directory",
                self.config_path.display()
            ))
        })
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<Config> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(Error::Config(format!("Failed to read config: {}", e))),
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub async fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self.config_dir()?;
        fs::create_dir_all(config_dir)
            .await
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;

        let content = serde_json::to_string_pretty(config)?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }

    /// Load, change and save in one step.
    pub async fn update(&self, change: impl FnOnce(&mut Config)) -> Result<Config> {
        let mut config = self.load().await?;
        change(&mut config);
        self.save(&config).await?;
        Ok(config)
    }
}
