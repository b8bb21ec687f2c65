//! OS advisory locks
//!
//! `flock` on Unix and `LockFileEx` on Windows. The kernel drops the lock when
//! the owning process exits, so crashed owners never need recovering.

use crate::lock::io::{lock_file_stem, NATIVE_LOCK_EXTENSION};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Outcome of one non-blocking attempt
#[derive(Debug)]
pub enum NativeAttempt {
    /// Lock held for as long as the file stays open
    Acquired(File),
    /// Another handle holds it
    Contended,
    /// The attempt failed for a reason that may pass (permissions, fd limits)
    Failed(io::Error),
    /// The filesystem or OS does not implement advisory locking
    Unsupported(io::Error),
}

impl NativeAttempt {
    fn from_error(e: io::Error) -> Self {
        if e.kind() == ErrorKind::WouldBlock {
            return Self::Contended;
        }
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        if cfg!(windows) && matches!(e.raw_os_error(), Some(32 | 33)) {
            return Self::Contended;
        }
        if locking_unsupported(&e) {
            Self::Unsupported(e)
        } else {
            Self::Failed(e)
        }
    }
}

/// Only these errors mean no process can take the native lock here
fn locking_unsupported(e: &io::Error) -> bool {
    e.kind() == ErrorKind::Unsupported || unsupported_errno(e.raw_os_error())
}

#[cfg(unix)]
fn unsupported_errno(code: Option<i32>) -> bool {
    matches!(
        code,
        Some(code) if code == libc::ENOLCK || code == libc::EOPNOTSUPP || code == libc::ENOSYS
    )
}

#[cfg(not(unix))]
fn unsupported_errno(_code: Option<i32>) -> bool {
    false
}

/// Advisory lock on a per-name file
#[derive(Debug, Clone)]
pub struct NativeLock {
    path: PathBuf,
}

impl NativeLock {
    /// Lock file for `name` under `dir`
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.{}", lock_file_stem(name), NATIVE_LOCK_EXTENSION)),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try once to take the lock
    pub fn try_lock(&self) -> NativeAttempt {
        let file = match self.open() {
            Ok(file) => file,
            Err(e) => return NativeAttempt::from_error(e),
        };

        match file.try_lock_exclusive() {
            Ok(()) => NativeAttempt::Acquired(file),
            Err(e) => NativeAttempt::from_error(e),
        }
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // The file is never truncated or removed; removing it would let a
        // waiter lock an unlinked inode while a newcomer locks a fresh one
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
    }
}

/// Release a lock taken by [`NativeLock::try_lock`]
pub fn unlock(file: &File) -> io::Result<()> {
    FileExt::unlock(file)
}
