//! Journal data model

use crate::journal::identity::PackageIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Schema version of the journal document
pub const JOURNAL_SCHEMA_VERSION: u32 = 1;

/// Environment variable the deployment agent sets to the running task id
pub const TASK_ID_ENV: &str = "PKGCACHE_TASK_ID";

/// Identifies one deployment execution; compared case-insensitively
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentTaskId(String);

impl DeploymentTaskId {
    /// Wrap a task id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Read the task id from [`TASK_ID_ENV`]
    pub fn from_env() -> Option<Self> {
        std::env::var(TASK_ID_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Self)
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for DeploymentTaskId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for DeploymentTaskId {}

impl fmt::Display for DeploymentTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentTaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A task's claim on a cached package; active until released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLock {
    /// Task holding (or having held) the package
    pub task: DeploymentTaskId,

    /// When the task registered its use
    pub acquired_at_utc: DateTime<Utc>,

    /// When the task released it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at_utc: Option<DateTime<Utc>>,
}

impl UsageLock {
    /// A new active lock
    pub fn new(task: DeploymentTaskId, at: DateTime<Utc>) -> Self {
        Self {
            task,
            acquired_at_utc: at,
            released_at_utc: None,
        }
    }

    /// Still protecting the package
    pub fn is_active(&self) -> bool {
        self.released_at_utc.is_none()
    }

    /// Latest timestamp on this record
    pub fn last_touched(&self) -> DateTime<Utc> {
        self.released_at_utc
            .map_or(self.acquired_at_utc, |released| released.max(self.acquired_at_utc))
    }
}

/// One cached package file and its usage history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    package: PackageIdentity,
    cache_file_path: PathBuf,
    #[serde(default)]
    file_size_bytes: u64,
    #[serde(default)]
    usages: Vec<UsageLock>,
}

impl JournalEntry {
    /// A new entry with no usages
    pub fn new(package: PackageIdentity, cache_file_path: PathBuf, file_size_bytes: u64) -> Self {
        Self {
            package,
            cache_file_path,
            file_size_bytes,
            usages: Vec::new(),
        }
    }

    /// Package identity
    pub fn package(&self) -> &PackageIdentity {
        &self.package
    }

    /// Location of the cached file
    pub fn cache_file_path(&self) -> &Path {
        &self.cache_file_path
    }

    /// Size of the cached file
    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes
    }

    /// Usage records, oldest first
    pub fn usages(&self) -> &[UsageLock] {
        &self.usages
    }

    /// Number of recorded usages
    pub fn usage_count(&self) -> usize {
        self.usages.len()
    }

    /// At least one task still holds the package
    pub fn is_locked(&self) -> bool {
        self.usages.iter().any(UsageLock::is_active)
    }

    /// Active usage locks
    pub fn active_locks(&self) -> impl Iterator<Item = &UsageLock> {
        self.usages.iter().filter(|u| u.is_active())
    }

    /// Most recent acquire or release, if ever used
    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        self.usages.iter().map(UsageLock::last_touched).max()
    }

    /// Point the entry at a (possibly moved) cache file
    pub fn relocate(&mut self, cache_file_path: PathBuf, file_size_bytes: u64) {
        self.cache_file_path = cache_file_path;
        self.file_size_bytes = file_size_bytes;
    }

    /// Record `task` as using the package; repeated calls refresh the existing record
    pub fn add_usage(&mut self, task: DeploymentTaskId, at: DateTime<Utc>) {
        match self.usages.iter_mut().find(|u| u.task == task) {
            Some(existing) => {
                existing.acquired_at_utc = at;
                existing.released_at_utc = None;
            }
            None => self.usages.push(UsageLock::new(task, at)),
        }
    }

    /// Release `task`'s active lock; false if it held none
    pub fn release(&mut self, task: &DeploymentTaskId, at: DateTime<Utc>) -> bool {
        match self
            .usages
            .iter_mut()
            .find(|u| u.is_active() && u.task == *task)
        {
            Some(lock) => {
                lock.released_at_utc = Some(at);
                true
            }
            None => false,
        }
    }

    /// Release active locks acquired before `cutoff`; returns how many
    pub fn release_acquired_before(&mut self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> usize {
        let mut released = 0;
        for lock in self
            .usages
            .iter_mut()
            .filter(|u| u.is_active() && u.acquired_at_utc < cutoff)
        {
            lock.released_at_utc = Some(at);
            released += 1;
        }
        released
    }
}

/// The full set of cache entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    version: u32,
    #[serde(default)]
    entries: Vec<JournalEntry>,
}

impl Default for Journal {
    fn default() -> Self {
        Self {
            version: JOURNAL_SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Journal {
    /// Schema version the document was written with
    pub fn version(&self) -> u32 {
        self.version
    }

    /// All entries
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Mutable access to all entries
    pub fn entries_mut(&mut self) -> &mut [JournalEntry] {
        &mut self.entries
    }

    /// Whether the journal has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry for `package`
    pub fn find(&self, package: &PackageIdentity) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| e.package == *package)
    }

    /// Mutable entry for `package`
    pub fn find_mut(&mut self, package: &PackageIdentity) -> Option<&mut JournalEntry> {
        self.entries.iter_mut().find(|e| e.package == *package)
    }

    /// Entry for `package`, created with the given location if absent
    pub fn find_or_insert(
        &mut self,
        package: &PackageIdentity,
        cache_file_path: &Path,
        file_size_bytes: u64,
    ) -> &mut JournalEntry {
        let index = match self.entries.iter().position(|e| e.package == *package) {
            Some(index) => {
                let entry = &mut self.entries[index];
                if entry.cache_file_path != cache_file_path || entry.file_size_bytes != file_size_bytes {
                    entry.relocate(cache_file_path.to_path_buf(), file_size_bytes);
                }
                index
            }
            None => {
                self.entries.push(JournalEntry::new(
                    package.clone(),
                    cache_file_path.to_path_buf(),
                    file_size_bytes,
                ));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index]
    }

    /// Remove the entry for `package`; returns it if present
    pub fn remove(&mut self, package: &PackageIdentity) -> Option<JournalEntry> {
        let index = self.entries.iter().position(|e| e.package == *package)?;
        Some(self.entries.remove(index))
    }

    /// Sum of all entry sizes
    pub fn total_size_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.file_size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::identity::VersionFormat;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 10, minute, 0).unwrap()
    }

    fn package(id: &str, version: &str) -> PackageIdentity {
        PackageIdentity::new(id, version, VersionFormat::Semver, "zip").unwrap()
    }

    fn entry() -> JournalEntry {
        JournalEntry::new(package("acme", "1.0"), PathBuf::from("/cache/acme.1.0.zip"), 100)
    }

    #[test]
    fn task_ids_compare_case_insensitively() {
        assert_eq!(DeploymentTaskId::from("ServerTasks-1"), DeploymentTaskId::from("servertasks-1"));
        assert_ne!(DeploymentTaskId::from("ServerTasks-1"), DeploymentTaskId::from("ServerTasks-2"));
    }

    #[test]
    fn usage_locks_entry_until_released() {
        let mut entry = entry();
        assert!(!entry.is_locked());

        entry.add_usage("T1".into(), at(0));
        assert!(entry.is_locked());

        assert!(entry.release(&"t1".into(), at(5)));
        assert!(!entry.is_locked());
        assert_eq!(entry.last_used(), Some(at(5)));
    }

    #[test]
    fn reregistering_refreshes_instead_of_duplicating() {
        let mut entry = entry();
        entry.add_usage("T1".into(), at(0));
        entry.release(&"T1".into(), at(1));
        entry.add_usage("T1".into(), at(2));

        assert_eq!(entry.usage_count(), 1);
        assert!(entry.is_locked());
        assert_eq!(entry.usages()[0].acquired_at_utc, at(2));
    }

    #[test]
    fn shared_locks_from_many_tasks() {
        let mut entry = entry();
        entry.add_usage("T1".into(), at(0));
        entry.add_usage("T2".into(), at(1));

        entry.release(&"T1".into(), at(2));
        assert!(entry.is_locked());
        assert_eq!(entry.active_locks().count(), 1);
    }

    #[test]
    fn release_without_lock_is_noop() {
        let mut entry = entry();
        assert!(!entry.release(&"T9".into(), at(0)));

        entry.add_usage("T1".into(), at(0));
        assert!(entry.release(&"T1".into(), at(1)));
        assert!(!entry.release(&"T1".into(), at(2)));
        assert_eq!(entry.usages()[0].released_at_utc, Some(at(1)));
    }

    #[test]
    fn release_acquired_before_cutoff() {
        let mut entry = entry();
        entry.add_usage("T1".into(), at(0));
        entry.add_usage("T2".into(), at(30));

        assert_eq!(entry.release_acquired_before(at(10), at(40)), 1);
        assert_eq!(entry.active_locks().next().unwrap().task, "T2".into());
    }

    #[test]
    fn find_or_insert_updates_location() {
        let mut journal = Journal::default();
        journal.find_or_insert(&package("acme", "1.0"), Path::new("/a.zip"), 10);
        journal.find_or_insert(&package("ACME", "1.0.0"), Path::new("/b.zip"), 20);

        assert_eq!(journal.len(), 1);
        let entry = journal.find(&package("acme", "1.0")).unwrap();
        assert_eq!(entry.cache_file_path(), Path::new("/b.zip"));
        assert_eq!(journal.total_size_bytes(), 20);
    }

    #[test]
    fn remove_returns_entry() {
        let mut journal = Journal::default();
        journal.find_or_insert(&package("acme", "1.0"), Path::new("/a.zip"), 10);

        assert!(journal.remove(&package("acme", "1.0")).is_some());
        assert!(journal.remove(&package("acme", "1.0")).is_none());
        assert!(journal.is_empty());
    }

    #[test]
    fn released_at_omitted_while_active() {
        let lock = UsageLock::new("T1".into(), at(0));
        let json = serde_json::to_string(&lock).unwrap();
        assert!(!json.contains("released_at_utc"));
    }
}
