//! Package journal operations
//!
//! Every mutating operation runs end to end under the journal lock: acquire,
//! load, modify, save (only when something changed), release. Bookkeeping
//! failures never propagate into a deployment; they are logged and reported
//! as a `false`/`0` outcome. Only a retention pass surfaces errors, and only
//! those it cannot work around.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{PkgCacheError, PkgCacheResult};
use crate::journal::identity::PackageIdentity;
use crate::journal::model::{DeploymentTaskId, Journal, JournalEntry, UsageLock};
use crate::journal::repository::{JournalRepository, JsonJournalRepository};
use crate::lock::{CrossProcessLock, LockOptions};
use crate::retention::{
    DiskSpace, LeastFrequentlyUsedWithAging, RetentionAlgorithm, RetentionContext,
    SystemDiskSpace,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cross-process lock name guarding the journal
pub const DEFAULT_LOCK_NAME: &str = "pkgcache-journal";

/// Outcome of a retention pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    /// Entries whose files were deleted and which left the journal
    pub removed: Vec<JournalEntry>,
    /// Entries selected but whose files could not be deleted
    pub failed: Vec<JournalEntry>,
    /// Bytes reclaimed
    pub freed_bytes: u64,
    /// Usage locks expired before ranking
    pub expired_locks: usize,
}

/// Tracks package usage and applies retention
pub struct PackageJournal {
    repository: Arc<dyn JournalRepository>,
    locks: CrossProcessLock,
    lock_name: String,
    cache_dir: PathBuf,
    sorter: LeastFrequentlyUsedWithAging,
    disk: Arc<dyn DiskSpace>,
    clock: Arc<dyn Clock>,
    stale_usage_lock_age: Option<Duration>,
}

impl PackageJournal {
    /// Journal over `repository`, serialized through `locks`
    pub fn new(repository: Arc<dyn JournalRepository>, locks: CrossProcessLock) -> Self {
        let cache_dir = repository
            .path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            repository,
            locks,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            cache_dir,
            sorter: LeastFrequentlyUsedWithAging::default(),
            disk: Arc::new(SystemDiskSpace),
            clock: Arc::new(SystemClock),
            stale_usage_lock_age: None,
        }
    }

    /// Journal wired from configuration
    pub fn from_config(config: &Config) -> Self {
        let repository = JsonJournalRepository::new(config.journal.path());
        let locks = CrossProcessLock::new(LockOptions::from(&config.lock));

        Self::new(Arc::new(repository), locks)
            .with_lock_name(config.journal.lock_name.clone())
            .with_cache_dir(config.journal.cache_directory.clone())
            .with_sorter(config.retention.sorter())
            .with_stale_usage_lock_age(config.retention.stale_usage_lock_age())
    }

    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Directory whose volume the disk space checks look at
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_sorter(mut self, sorter: LeastFrequentlyUsedWithAging) -> Self {
        self.sorter = sorter;
        self
    }

    pub fn with_disk_space(mut self, disk: Arc<dyn DiskSpace>) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Expire usage locks older than `age` at the start of each retention pass
    pub fn with_stale_usage_lock_age(mut self, age: Option<Duration>) -> Self {
        self.stale_usage_lock_age = age;
        self
    }

    /// Location of the journal file
    pub fn journal_path(&self) -> &Path {
        self.repository.path()
    }

    /// Directory holding the cached packages
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Mark `package` as in use by `task`; it cannot be evicted until released
    pub fn register_package_use(
        &self,
        package: &PackageIdentity,
        cache_file_path: &Path,
        task: &DeploymentTaskId,
    ) -> bool {
        let size = match fs::metadata(cache_file_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(
                    "Unable to read size of cached package {}: {}",
                    cache_file_path.display(),
                    e
                );
                0
            }
        };

        let result = self.update(|journal, now| {
            journal
                .find_or_insert(package, cache_file_path, size)
                .add_usage(task.clone(), now);
            Ok(((), true))
        });

        match result {
            Ok(Some(())) => {
                debug!("Registered package use for {} and task {}", package, task);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Unable to register package use for retention: {}", e);
                false
            }
        }
    }

    /// Release `task`'s use of `package`; releasing twice, or an unknown task, is a no-op
    pub fn release_package_use(&self, package: &PackageIdentity, task: &DeploymentTaskId) -> bool {
        let result = self.update(|journal, now| {
            let released = journal
                .find_mut(package)
                .is_some_and(|entry| entry.release(task, now));
            Ok((released, released))
        });

        match result {
            Ok(Some(true)) => {
                debug!("Released package use for {} and task {}", package, task);
                true
            }
            Ok(Some(false)) => {
                debug!("No active use of {} by task {} to release", package, task);
                false
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Unable to release package use for retention: {}", e);
                false
            }
        }
    }

    /// Release every package `task` still holds; returns how many locks were released
    pub fn release_all_for_task(&self, task: &DeploymentTaskId) -> usize {
        let result = self.update(|journal, now| {
            let released = journal
                .entries_mut()
                .iter_mut()
                .map(|entry| entry.release(task, now))
                .filter(|released| *released)
                .count();
            Ok((released, released > 0))
        });

        match result {
            Ok(Some(released)) => {
                debug!("Released {} package locks held by task {}", released, task);
                released
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("Unable to release package locks for task {}: {}", task, e);
                0
            }
        }
    }

    /// Release usage locks acquired more than `max_age` ago
    pub fn expire_stale_locks(&self, max_age: Duration) -> usize {
        let result = self.update(|journal, now| {
            let expired = expire(journal, max_age, now);
            Ok((expired, expired > 0))
        });

        match result {
            Ok(Some(expired)) => expired,
            Ok(None) => 0,
            Err(e) => {
                warn!("Unable to expire stale package locks: {}", e);
                0
            }
        }
    }

    /// Run `algorithms` in order and delete what they select
    pub fn apply_retention(
        &self,
        algorithms: &[Box<dyn RetentionAlgorithm>],
    ) -> PkgCacheResult<RetentionReport> {
        debug!(
            "Applying package retention for {}",
            self.cache_dir.display()
        );

        let report = self.update(|journal, now| {
            debug!(
                "Journal holds {} packages totalling {} bytes",
                journal.len(),
                journal.total_size_bytes()
            );
            let mut report = RetentionReport::default();
            if let Some(max_age) = self.stale_usage_lock_age {
                report.expired_locks = expire(journal, max_age, now);
            }

            let victims: Vec<JournalEntry> = self
                .select_for_removal(journal, algorithms, now)?
                .into_iter()
                .cloned()
                .collect();

            for victim in victims {
                if delete_cached_file(victim.cache_file_path()) {
                    journal.remove(victim.package());
                    report.freed_bytes += victim.file_size_bytes();
                    report.removed.push(victim);
                } else {
                    report.failed.push(victim);
                }
            }

            let changed = report.expired_locks > 0 || !report.removed.is_empty();
            Ok((report, changed))
        })?;

        let report = report.unwrap_or_default();
        if !report.removed.is_empty() {
            info!(
                "Package retention removed {} packages, freeing {} bytes",
                report.removed.len(),
                report.freed_bytes
            );
        }
        Ok(report)
    }

    /// What [`apply_retention`](Self::apply_retention) would remove right now
    pub fn plan_retention(
        &self,
        algorithms: &[Box<dyn RetentionAlgorithm>],
    ) -> PkgCacheResult<Vec<JournalEntry>> {
        let mut journal = self.load_for_read()?;
        let now = self.clock.now();
        if let Some(max_age) = self.stale_usage_lock_age {
            expire(&mut journal, max_age, now);
        }

        Ok(self
            .select_for_removal(&journal, algorithms, now)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Whether any task currently holds `package`
    pub fn has_lock(&self, package: &PackageIdentity) -> bool {
        self.read_entry(package)
            .is_some_and(|entry| entry.is_locked())
    }

    /// Usage history of `package`
    pub fn usage(&self, package: &PackageIdentity) -> Vec<UsageLock> {
        self.read_entry(package)
            .map(|entry| entry.usages().to_vec())
            .unwrap_or_default()
    }

    /// Number of recorded uses of `package`
    pub fn usage_count(&self, package: &PackageIdentity) -> usize {
        self.read_entry(package)
            .map_or(0, |entry| entry.usage_count())
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> PkgCacheResult<Vec<JournalEntry>> {
        Ok(self.load_for_read()?.entries().to_vec())
    }

    fn read_entry(&self, package: &PackageIdentity) -> Option<JournalEntry> {
        match self.load_for_read() {
            Ok(journal) => journal.find(package).cloned(),
            Err(e) => {
                warn!("Unable to read package journal: {}", e);
                None
            }
        }
    }

    /// Ranking computed once, algorithms applied in order over what is left of it
    fn select_for_removal<'j>(
        &self,
        journal: &'j Journal,
        algorithms: &[Box<dyn RetentionAlgorithm>],
        now: DateTime<Utc>,
    ) -> PkgCacheResult<Vec<&'j JournalEntry>> {
        let all: Vec<&'j JournalEntry> = journal.entries().iter().collect();
        let ranked = self.sorter.rank(&all, now);

        let mut selected: Vec<&'j JournalEntry> = Vec::new();
        let mut selected_bytes = 0u64;

        for algorithm in algorithms {
            let not_selected = |e: &&'j JournalEntry| !contains(&selected, e);
            let remaining: Vec<&'j JournalEntry> = all.iter().copied().filter(not_selected).collect();
            let candidates: Vec<&'j JournalEntry> =
                ranked.iter().copied().filter(not_selected).collect();

            let ctx = RetentionContext {
                cache_dir: &self.cache_dir,
                disk: self.disk.as_ref(),
                entries: &remaining,
                selected_bytes,
                now,
            };
            let picked = algorithm.select_entries_to_remove(&candidates, &ctx)?;
            debug!("{} retention selected {} packages", algorithm.name(), picked.len());

            for entry in picked {
                if entry.is_locked() || contains(&selected, &entry) {
                    continue;
                }
                selected_bytes = selected_bytes.saturating_add(entry.file_size_bytes());
                selected.push(entry);
            }
        }

        Ok(selected)
    }

    /// Load-modify-save under the journal lock
    ///
    /// `None` when the journal belongs to a newer version of this tool and
    /// must be left alone.
    fn update<T>(
        &self,
        apply: impl FnOnce(&mut Journal, DateTime<Utc>) -> PkgCacheResult<(T, bool)>,
    ) -> PkgCacheResult<Option<T>> {
        let wait_message = format!(
            "Waiting for another process to release the package journal lock {}",
            self.lock_name
        );
        let _guard = self.locks.acquire(&self.lock_name, &wait_message)?;

        let Some(mut journal) = self.load_for_update()? else {
            return Ok(None);
        };

        let (value, changed) = apply(&mut journal, self.clock.now())?;
        if changed {
            self.repository.save(&journal)?;
        }
        Ok(Some(value))
    }

    fn load_for_update(&self) -> PkgCacheResult<Option<Journal>> {
        match self.repository.load() {
            Ok(journal) => Ok(Some(journal)),
            Err(PkgCacheError::JournalCorrupt { path, reason }) => {
                match self.repository.backup_corrupt() {
                    Ok(backup) => warn!(
                        "Package journal {} is corrupt ({}); copied to {} and starting afresh",
                        path.display(),
                        reason,
                        backup.display()
                    ),
                    Err(e) => warn!(
                        "Package journal {} is corrupt ({}) and could not be backed up ({}); starting afresh",
                        path.display(),
                        reason,
                        e
                    ),
                }
                Ok(Some(Journal::default()))
            }
            Err(e @ PkgCacheError::JournalVersionUnsupported { .. }) => {
                warn!("{}; leaving it untouched", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn load_for_read(&self) -> PkgCacheResult<Journal> {
        match self.repository.load() {
            Err(
                e @ (PkgCacheError::JournalCorrupt { .. }
                | PkgCacheError::JournalVersionUnsupported { .. }),
            ) => {
                warn!("{}; treating the journal as empty", e);
                Ok(Journal::default())
            }
            other => other,
        }
    }
}

fn contains(selected: &[&JournalEntry], entry: &JournalEntry) -> bool {
    selected.iter().any(|s| s.package() == entry.package())
}

fn expire(journal: &mut Journal, max_age: Duration, now: DateTime<Utc>) -> usize {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return 0;
    };
    let cutoff = now - max_age;

    let mut expired = 0;
    for entry in journal.entries_mut() {
        let released = entry.release_acquired_before(cutoff, now);
        if released > 0 {
            info!(
                "Expired {} stale usage locks on {}",
                released,
                entry.package()
            );
        }
        expired += released;
    }
    expired
}

/// Delete a cached package file; already gone counts as deleted
fn delete_cached_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed cached package {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Cached package {} was already gone", path.display());
            true
        }
        Err(e) => {
            warn!("Unable to remove cached package {}: {}", path.display(), e);
            false
        }
    }
}
