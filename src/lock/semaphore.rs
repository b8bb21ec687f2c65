//! Lock-file protocol
//!
//! A lock is a file holding a [`LockRecord`]. Whoever manages to create the
//! file owns the lock. Abandoned locks are recovered when the recorded owner
//! is no longer running, or when the record is older than the lock timeout.

use crate::clock::{elapsed_between, Clock};
use crate::lock::io::LockIo;
use crate::lock::process::{current_owner, ProcessFinder};
use crate::lock::record::{LockFileState, LockRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decision taken after inspecting an existing lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAction {
    /// Held by a live owner; retry later
    DontAcquire,
    /// Free, ours already, or abandoned by a dead owner
    Acquire,
    /// Timed out; delete the file before taking it
    ForciblyAcquire,
}

/// A named lock backed by a lock file
pub struct LockFileSemaphore {
    name: String,
    path: PathBuf,
    timeout: Duration,
    io: Arc<dyn LockIo>,
    processes: Arc<dyn ProcessFinder>,
    clock: Arc<dyn Clock>,
}

impl LockFileSemaphore {
    /// Create a semaphore for `name`; `timeout` is the staleness limit
    pub fn new(
        name: impl Into<String>,
        timeout: Duration,
        io: Arc<dyn LockIo>,
        processes: Arc<dyn ProcessFinder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let path = io.lock_path(&name);
        Self {
            name,
            path,
            timeout,
            io,
            processes,
            clock,
        }
    }

    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decide what to do about the lock file in `state`
    pub fn should_acquire(&self, state: &LockFileState) -> AcquireAction {
        match state {
            LockFileState::Missing => AcquireAction::Acquire,

            // Someone has the file open exclusively, or it cannot be opened at all
            LockFileState::Inaccessible { modified_at } => {
                if elapsed_between(*modified_at, self.clock.now()) > self.timeout {
                    warn!(
                        "Lock file could not be opened for longer than lock timeout. Forcibly taking lock."
                    );
                    AcquireAction::ForciblyAcquire
                } else {
                    AcquireAction::DontAcquire
                }
            }

            LockFileState::Unreadable { modified_at } => {
                if elapsed_between(*modified_at, self.clock.now()) > self.timeout {
                    warn!(
                        "Lock file existed but was not readable, and has existed for longer than lock timeout. Taking lock."
                    );
                    AcquireAction::Acquire
                } else {
                    AcquireAction::DontAcquire
                }
            }

            LockFileState::Held(record) => self.should_acquire_held(record),
        }
    }

    fn should_acquire_held(&self, record: &LockRecord) -> AcquireAction {
        if record.same_owner(&current_owner(self.clock.as_ref())) {
            return AcquireAction::Acquire;
        }

        if !self
            .processes
            .is_running(record.process_id, &record.process_name)
        {
            warn!(
                "Process {}, thread {} had lock, but appears to have crashed. Taking lock.",
                record.process_id, record.thread_id
            );
            return AcquireAction::Acquire;
        }

        let now = self.clock.now();
        let age = elapsed_between(record.acquired_at_utc, now)
            .max(elapsed_between(now, record.acquired_at_utc));
        if age <= self.timeout {
            return AcquireAction::DontAcquire;
        }

        warn!(
            "Forcibly taking lock from process {} ({}), thread {} as lock has timed out.",
            record.process_id, record.process_name, record.thread_id
        );
        AcquireAction::ForciblyAcquire
    }

    /// One acquisition attempt
    pub fn try_acquire(&self) -> bool {
        let state = self.io.read(&self.path);
        match self.should_acquire(&state) {
            AcquireAction::DontAcquire => false,
            AcquireAction::Acquire => {
                // A crashed owner's record is still on disk
                if let LockFileState::Held(record) = &state {
                    if !record.same_owner(&current_owner(self.clock.as_ref())) {
                        self.delete_if_unchanged(&state);
                    }
                }
                self.write_owner()
            }
            AcquireAction::ForciblyAcquire => {
                self.delete_if_unchanged(&state);
                self.write_owner()
            }
        }
    }

    /// Delete the lock file unless another process replaced it since `seen`
    fn delete_if_unchanged(&self, seen: &LockFileState) {
        if self.io.read(&self.path) == *seen {
            self.io.delete(&self.path);
        }
    }

    fn write_owner(&self) -> bool {
        self.io
            .write(&self.path, &current_owner(self.clock.as_ref()))
    }

    /// Release the lock if, and only if, we can currently claim it
    pub fn release(&self) {
        if self.io.exists(&self.path) && self.try_acquire() {
            self.io.delete(&self.path);
            debug!("Released lock {}", self.name);
        }
    }
}
