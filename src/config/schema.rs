//! Configuration schema for pkgcache
//!
//! Configuration is stored at `~/.config/pkgcache/config.toml`

use crate::config::ConfigManager;
use crate::journal::DEFAULT_LOCK_NAME;
use crate::lock::{LockOptions, LockStrategy};
use crate::retention::{
    AlgorithmKind, CacheSizeCleaner, LeastFrequentlyUsedWithAging, PackageQuantityCleaner,
    PercentFreeDiskSpaceCleaner, RetentionAlgorithm,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Journal and cache locations
    pub journal: JournalConfig,

    /// Cross-process lock tuning
    pub lock: LockConfig,

    /// Retention policy
    pub retention: RetentionConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Where the journal and cached packages live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory holding the journal file
    pub directory: PathBuf,

    /// Journal file name
    pub file_name: String,

    /// Directory holding cached package files
    pub cache_directory: PathBuf,

    /// Name of the cross-process lock guarding the journal
    pub lock_name: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        let state = ConfigManager::state_dir();
        Self {
            cache_directory: state.join("packages"),
            directory: state,
            file_name: "packages.journal.json".to_string(),
            lock_name: DEFAULT_LOCK_NAME.to_string(),
        }
    }
}

impl JournalConfig {
    /// Full path of the journal file
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Cross-process lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// auto, native or lock-file
    pub strategy: LockStrategy,

    /// Age after which a lock file is taken by force
    pub timeout_secs: u64,

    /// Sleep between acquisition attempts
    pub poll_interval_ms: u64,

    /// Delay before logging that we are waiting
    pub wait_notice_secs: u64,

    /// Directory for lock files (default: system temp dir)
    pub directory: Option<PathBuf>,

    /// Give up waiting after this long (default: wait indefinitely)
    pub max_wait_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::Auto,
            timeout_secs: 120,
            poll_interval_ms: 100,
            wait_notice_secs: 3,
            directory: None,
            max_wait_secs: None,
        }
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(config: &LockConfig) -> Self {
        Self {
            directory: config
                .directory
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            strategy: config.strategy,
            timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            wait_notice_after: Duration::from_secs(config.wait_notice_secs),
            max_wait: config.max_wait_secs.map(Duration::from_secs),
        }
    }
}

/// Retention policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run retention passes at all
    pub enabled: bool,

    /// Algorithms to run, in order
    pub algorithms: Vec<AlgorithmKind>,

    /// Minimum free space on the cache volume, in percent
    pub percent_free_disk_space: f64,

    /// Extra space to free beyond the shortfall, in percent of it
    pub free_space_buffer_percent: f64,

    /// Maximum number of cached packages
    pub max_packages: Option<usize>,

    /// Maximum versions kept per package
    pub max_versions_per_package: Option<usize>,

    /// Maximum total size of the cache
    pub max_cache_size_mb: Option<u64>,

    /// Usage frequency halves after this many idle hours
    pub decay_half_life_hours: f64,

    /// Score divisor per newer cached version, minus one
    pub newer_version_weight: f64,

    /// Expire usage locks older than this at each pass
    pub stale_usage_lock_hours: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithms: vec![AlgorithmKind::FreeSpace, AlgorithmKind::Quantity],
            percent_free_disk_space: 20.0,
            free_space_buffer_percent: 0.0,
            max_packages: None,
            max_versions_per_package: None,
            max_cache_size_mb: None,
            decay_half_life_hours: 168.0,
            newer_version_weight: 1.0,
            stale_usage_lock_hours: None,
        }
    }
}

impl RetentionConfig {
    /// Configured algorithms in order; empty when retention is disabled
    ///
    /// Algorithms whose limits are not configured are skipped.
    pub fn algorithms(&self) -> Vec<Box<dyn RetentionAlgorithm>> {
        if !self.enabled {
            return Vec::new();
        }

        let mut algorithms: Vec<Box<dyn RetentionAlgorithm>> = Vec::new();
        for kind in &self.algorithms {
            match kind {
                AlgorithmKind::FreeSpace => algorithms.push(Box::new(
                    PercentFreeDiskSpaceCleaner::new(self.percent_free_disk_space)
                        .with_buffer_percent(self.free_space_buffer_percent),
                )),
                AlgorithmKind::Quantity => {
                    match (self.max_packages, self.max_versions_per_package) {
                        (Some(max), Some(versions)) => algorithms.push(Box::new(
                            PackageQuantityCleaner::new(max).with_max_versions_per_package(versions),
                        )),
                        (Some(max), None) => {
                            algorithms.push(Box::new(PackageQuantityCleaner::new(max)))
                        }
                        (None, Some(versions)) => algorithms
                            .push(Box::new(PackageQuantityCleaner::versions_only(versions))),
                        (None, None) => {}
                    }
                }
                AlgorithmKind::CacheSize => match self.max_cache_size_mb {
                    Some(mb) => algorithms.push(Box::new(CacheSizeCleaner::from_megabytes(mb))),
                    None => warn!("cache-size retention configured without max_cache_size_mb"),
                },
            }
        }
        algorithms
    }

    /// Configured eviction ranking
    pub fn sorter(&self) -> LeastFrequentlyUsedWithAging {
        let hours = if self.decay_half_life_hours.is_finite() {
            self.decay_half_life_hours.max(0.0)
        } else {
            0.0
        };
        LeastFrequentlyUsedWithAging::new(
            Duration::from_secs_f64(hours * 3600.0),
            self.newer_version_weight,
        )
    }

    /// Configured usage lock expiry
    pub fn stale_usage_lock_age(&self) -> Option<Duration> {
        self.stale_usage_lock_hours
            .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
    }
}
