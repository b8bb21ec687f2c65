//! Configuration management for pkgcache

pub mod schema;

pub use schema::{Config, GeneralConfig, JournalConfig, LockConfig, RetentionConfig};

use crate::error::{PkgCacheError, PkgCacheResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "PKGCACHE_CONFIG";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pkgcache")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pkgcache")
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub async fn load(&self) -> PkgCacheResult<Config> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> PkgCacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PkgCacheError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| PkgCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        validate(path, &config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> PkgCacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            PkgCacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> PkgCacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PkgCacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(path: &Path, config: &Config) -> PkgCacheResult<()> {
    let invalid = |reason: &str| PkgCacheError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(invalid("general.log_format must be \"text\" or \"json\""));
    }

    let retention = &config.retention;
    if !(0.0..=100.0).contains(&retention.percent_free_disk_space) {
        return Err(invalid("retention.percent_free_disk_space must be between 0 and 100"));
    }
    if !retention.decay_half_life_hours.is_finite() || retention.decay_half_life_hours <= 0.0 {
        return Err(invalid("retention.decay_half_life_hours must be positive"));
    }
    if !retention.newer_version_weight.is_finite() || retention.newer_version_weight < 0.0 {
        return Err(invalid("retention.newer_version_weight cannot be negative"));
    }
    if config.journal.file_name.trim().is_empty() {
        return Err(invalid("journal.file_name cannot be empty"));
    }
    if config.journal.lock_name.trim().is_empty() {
        return Err(invalid("journal.lock_name cannot be empty"));
    }
    Ok(())
}
