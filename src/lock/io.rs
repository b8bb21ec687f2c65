//! Reading and writing lock files
//!
//! Lock files are named from the lock name plus a short SHA256 of it, so any
//! string can be used as a lock name and two names that sanitize to the same
//! stem never share a file.

use crate::lock::record::{LockFileState, LockRecord};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extension used by the lock-file protocol
pub const LOCK_FILE_EXTENSION: &str = "lck";

/// Extension used by the native advisory lock
pub const NATIVE_LOCK_EXTENSION: &str = "lock";

/// File operations needed by the lock-file protocol
pub trait LockIo: Send + Sync {
    /// Path of the lock file for `name`
    fn lock_path(&self, name: &str) -> PathBuf;

    /// Whether a lock file exists
    fn exists(&self, path: &Path) -> bool;

    /// Read and classify the lock file
    fn read(&self, path: &Path) -> LockFileState;

    /// Write `record`; returns true only if `record`'s owner holds the file afterwards
    fn write(&self, path: &Path, record: &LockRecord) -> bool;

    /// Delete the lock file, ignoring failures
    fn delete(&self, path: &Path);
}

/// Build the on-disk stem for a lock name
pub fn lock_file_stem(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();

    let digest = Sha256::digest(name.as_bytes());
    format!("{}-{}", sanitized, &hex::encode(digest)[..12])
}

/// Lock files stored in one directory
#[derive(Debug, Clone)]
pub struct FsLockIo {
    dir: PathBuf,
}

impl FsLockIo {
    /// Store lock files under `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the lock files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create_new(&self, path: &Path, record: &LockRecord) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec(record).map_err(io::Error::other)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(&content)?;
        file.sync_all()
    }

    fn replace(&self, path: &Path, record: &LockRecord) -> io::Result<()> {
        let tmp = path.with_extension(format!("{}.{}.tmp", LOCK_FILE_EXTENSION, uuid::Uuid::new_v4()));
        let content = serde_json::to_vec(record).map_err(io::Error::other)?;
        {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(&content)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }
}

impl LockIo for FsLockIo {
    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", lock_file_stem(name), LOCK_FILE_EXTENSION))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> LockFileState {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return LockFileState::Missing,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return LockFileState::Unreadable {
                    modified_at: modified_at(path),
                }
            }
            Err(e) => {
                debug!("Lock file {} could not be opened: {}", path.display(), e);
                return LockFileState::Inaccessible {
                    modified_at: modified_at(path),
                };
            }
        };

        match LockRecord::parse(&content) {
            Ok(record) => LockFileState::Held(record),
            Err(reason) => {
                debug!("Lock file {} is unreadable: {}", path.display(), reason);
                LockFileState::Unreadable {
                    modified_at: modified_at(path),
                }
            }
        }
    }

    fn write(&self, path: &Path, record: &LockRecord) -> bool {
        match self.read(path) {
            LockFileState::Held(current) if current.same_owner(record) => {
                if current.acquired_at_utc == record.acquired_at_utc {
                    return true;
                }
                debug!("Already own lock {}, refreshing timestamp", path.display());
                return match self.replace(path, record) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Failed to refresh lock {}: {}", path.display(), e);
                        false
                    }
                };
            }
            LockFileState::Unreadable { .. } => self.delete(path),
            _ => {}
        }

        if let Err(e) = self.create_new(path, record) {
            debug!("Failed to write lock {}: {}", path.display(), e);
            return false;
        }

        // Another writer may have replaced the file between create and read
        matches!(self.read(path), LockFileState::Held(written) if written.same_owner(record))
    }

    fn delete(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to delete lock {}: {}", path.display(), e),
        }
    }
}

fn modified_at(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
