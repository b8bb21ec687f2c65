//! Cache retention
//!
//! A retention pass ranks the unlocked journal entries once with
//! [`LeastFrequentlyUsedWithAging`], then asks each [`RetentionAlgorithm`] in
//! turn which entries from the front of that ranking it wants removed.

pub mod cache_size;
pub mod free_space;
pub mod quantity;
pub mod scoring;

pub use cache_size::CacheSizeCleaner;
pub use free_space::PercentFreeDiskSpaceCleaner;
pub use quantity::PackageQuantityCleaner;
pub use scoring::LeastFrequentlyUsedWithAging;

use crate::error::{PkgCacheError, PkgCacheResult};
use crate::journal::JournalEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Free and total bytes of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSpace {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl VolumeSpace {
    /// Free space as a percentage of capacity, counting `extra_free` bytes as free
    pub fn percent_free_with(&self, extra_free: u64) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        let free = self.free_bytes.saturating_add(extra_free).min(self.total_bytes);
        free as f64 * 100.0 / self.total_bytes as f64
    }
}

/// Disk space queries for the cache volume
pub trait DiskSpace: Send + Sync {
    /// Space on the volume containing `path`
    fn space(&self, path: &Path) -> PkgCacheResult<VolumeSpace>;
}

/// Queries the OS
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn space(&self, path: &Path) -> PkgCacheResult<VolumeSpace> {
        // The cache directory may not exist yet; its volume is that of the
        // nearest existing ancestor
        let probe = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or(path)
            .to_path_buf();

        let disk_error = |source| PkgCacheError::DiskSpace {
            path: probe.clone(),
            source,
        };
        let free_bytes = fs4::available_space(&probe).map_err(disk_error)?;
        let total_bytes = fs4::total_space(&probe).map_err(disk_error)?;

        Ok(VolumeSpace {
            free_bytes,
            total_bytes,
        })
    }
}

/// Reports the same figures for every path
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub VolumeSpace);

impl FixedDiskSpace {
    pub fn new(free_bytes: u64, total_bytes: u64) -> Self {
        Self(VolumeSpace {
            free_bytes,
            total_bytes,
        })
    }
}

impl DiskSpace for FixedDiskSpace {
    fn space(&self, _path: &Path) -> PkgCacheResult<VolumeSpace> {
        Ok(self.0)
    }
}

/// State visible to an algorithm during a retention pass
pub struct RetentionContext<'c> {
    /// Directory holding the cached package files
    pub cache_dir: &'c Path,
    /// Disk space source for the cache volume
    pub disk: &'c dyn DiskSpace,
    /// Every entry, locked or not, that no earlier algorithm selected
    pub entries: &'c [&'c JournalEntry],
    /// Bytes already selected for removal earlier in the pass
    pub selected_bytes: u64,
    /// Time the pass started
    pub now: DateTime<Utc>,
}

/// A retention policy
pub trait RetentionAlgorithm: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Entries to remove, taken from the front of `ranked` (least valuable first)
    fn select_entries_to_remove<'e>(
        &self,
        ranked: &[&'e JournalEntry],
        ctx: &RetentionContext<'_>,
    ) -> PkgCacheResult<Vec<&'e JournalEntry>>;
}

/// Configurable algorithm names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmKind {
    FreeSpace,
    Quantity,
    CacheSize,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeSpace => write!(f, "free-space"),
            Self::Quantity => write!(f, "quantity"),
            Self::CacheSize => write!(f, "cache-size"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Entry builders shared by the algorithm tests

    use crate::journal::{DeploymentTaskId, JournalEntry, PackageIdentity, VersionFormat};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::path::PathBuf;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    /// Unlocked entry used `uses` times, last released `ago` before [`now`]
    pub fn entry(id: &str, version: &str, size: u64, uses: usize, ago: Duration) -> JournalEntry {
        let package = PackageIdentity::new(id, version, VersionFormat::Semver, "zip").unwrap();
        let mut entry = JournalEntry::new(
            package,
            PathBuf::from(format!("/cache/{}.{}.zip", id, version)),
            size,
        );
        for i in 0..uses {
            let task = DeploymentTaskId::new(format!("T{}", i));
            entry.add_usage(task.clone(), now() - ago - Duration::minutes(1));
            entry.release(&task, now() - ago);
        }
        entry
    }

    /// Entry still held by a task
    pub fn locked(id: &str, version: &str, size: u64) -> JournalEntry {
        let mut entry = entry(id, version, size, 0, Duration::zero());
        entry.add_usage(DeploymentTaskId::new("active"), now());
        entry
    }
}
