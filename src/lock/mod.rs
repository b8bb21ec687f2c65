//! Cross-process named locks
//!
//! Guards the package journal against concurrent deployment processes on the
//! same machine. Two backends:
//!
//! | Backend | Used when | Crash recovery |
//! |---------|-----------|----------------|
//! | Native advisory lock | `auto`/`native`, OS supports it | kernel releases on exit |
//! | Lock-file protocol | `lock-file`, or `auto` fallback | owner liveness + timeout |
//!
//! Acquisition returns a [`LockGuard`] that releases on drop, so every exit
//! path, including unwinding, gives the lock back.

pub mod io;
pub mod native;
pub mod process;
pub mod record;
pub mod semaphore;

pub use io::{FsLockIo, LockIo};
pub use native::NativeLock;
pub use process::{ProcessFinder, SystemProcessFinder};
pub use record::{LockFileState, LockRecord};
pub use semaphore::{AcquireAction, LockFileSemaphore};

use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::error::{PkgCacheError, PkgCacheResult};
use native::NativeAttempt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategy {
    /// Native lock, falling back to lock files where the filesystem has no advisory locking
    #[default]
    Auto,
    /// Native lock only
    Native,
    /// Lock-file protocol only
    LockFile,
}

impl fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Native => write!(f, "native"),
            Self::LockFile => write!(f, "lock-file"),
        }
    }
}

/// Tuning for lock acquisition
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Directory holding lock files
    pub directory: PathBuf,
    /// Backend selection
    pub strategy: LockStrategy,
    /// Age after which a live owner's lock file is taken by force
    pub timeout: Duration,
    /// Sleep between attempts
    pub poll_interval: Duration,
    /// Delay before the one-off "still waiting" message
    pub wait_notice_after: Duration,
    /// Give up after this long; `None` waits indefinitely
    pub max_wait: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            strategy: LockStrategy::Auto,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
            wait_notice_after: Duration::from_secs(3),
            max_wait: None,
        }
    }
}

/// Factory for named cross-process locks
pub struct CrossProcessLock {
    options: LockOptions,
    io: Arc<dyn LockIo>,
    processes: Arc<dyn ProcessFinder>,
    clock: Arc<dyn Clock>,
}

impl CrossProcessLock {
    /// Lock factory using the real filesystem, process table and clock
    pub fn new(options: LockOptions) -> Self {
        let io = Arc::new(FsLockIo::new(options.directory.clone()));
        Self::with_dependencies(options, io, Arc::new(SystemProcessFinder), Arc::new(SystemClock))
    }

    /// Lock factory with injected collaborators
    pub fn with_dependencies(
        options: LockOptions,
        io: Arc<dyn LockIo>,
        processes: Arc<dyn ProcessFinder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            options,
            io,
            processes,
            clock,
        }
    }

    /// Options in effect
    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Block until `name` is held, or until the configured `max_wait` runs out
    pub fn acquire(&self, name: &str, wait_message: &str) -> PkgCacheResult<LockGuard> {
        self.acquire_inner(name, wait_message, self.options.max_wait)
    }

    /// Block until `name` is held or `budget` has elapsed
    pub fn acquire_within(
        &self,
        name: &str,
        wait_message: &str,
        budget: Duration,
    ) -> PkgCacheResult<LockGuard> {
        self.acquire_inner(name, wait_message, Some(budget))
    }

    fn acquire_inner(
        &self,
        name: &str,
        wait_message: &str,
        budget: Option<Duration>,
    ) -> PkgCacheResult<LockGuard> {
        if name.is_empty() {
            return Err(PkgCacheError::Internal("lock name cannot be empty".to_string()));
        }

        let mut wait = Wait::new(self.clock.as_ref(), &self.options, budget, wait_message);

        if self.options.strategy != LockStrategy::LockFile {
            let native = NativeLock::new(&self.options.directory, name);
            let mut reported = false;
            loop {
                match native.try_lock() {
                    NativeAttempt::Acquired(file) => {
                        debug!("Acquired native lock {}", name);
                        return Ok(LockGuard::native(name, native.path(), file));
                    }
                    NativeAttempt::Contended => wait.tick(name)?,
                    // Another process may hold the native lock; switching to the
                    // lock file here would let both in
                    NativeAttempt::Failed(e) => {
                        if !reported {
                            warn!(
                                "Unable to take native lock {} ({}), retrying",
                                native.path().display(),
                                e
                            );
                            reported = true;
                        }
                        wait.tick(name)?
                    }
                    NativeAttempt::Unsupported(e) if self.options.strategy == LockStrategy::Auto => {
                        debug!(
                            "Native lock unavailable for {} ({}), using lock file",
                            name, e
                        );
                        break;
                    }
                    NativeAttempt::Unsupported(e) => {
                        return Err(PkgCacheError::io(
                            format!("taking native lock {}", native.path().display()),
                            e,
                        ))
                    }
                }
            }
        }

        let semaphore = LockFileSemaphore::new(
            name,
            self.options.timeout,
            self.io.clone(),
            self.processes.clone(),
            self.clock.clone(),
        );
        loop {
            if semaphore.try_acquire() {
                debug!("Acquired lock file {}", semaphore.path().display());
                return Ok(LockGuard::lock_file(semaphore));
            }
            wait.tick(name)?;
        }
    }
}

/// Bounded polling with a one-off notice
struct Wait<'a> {
    clock: &'a dyn Clock,
    started: chrono::DateTime<chrono::Utc>,
    poll_interval: Duration,
    notice_after: Duration,
    budget: Option<Duration>,
    message: &'a str,
    noticed: bool,
}

impl<'a> Wait<'a> {
    fn new(
        clock: &'a dyn Clock,
        options: &LockOptions,
        budget: Option<Duration>,
        message: &'a str,
    ) -> Self {
        Self {
            clock,
            started: clock.now(),
            poll_interval: options.poll_interval,
            notice_after: options.wait_notice_after,
            budget,
            message,
            noticed: false,
        }
    }

    fn tick(&mut self, name: &str) -> PkgCacheResult<()> {
        let waited = elapsed_between(self.started, self.clock.now());

        if let Some(budget) = self.budget {
            if waited >= budget {
                return Err(PkgCacheError::LockTimeout {
                    name: name.to_string(),
                    waited,
                });
            }
        }

        if !self.noticed && waited >= self.notice_after {
            info!("{}", self.message);
            self.noticed = true;
        }

        self.clock.sleep(self.poll_interval);
        Ok(())
    }
}

enum Held {
    Native { file: File },
    LockFile { semaphore: LockFileSemaphore },
}

/// A held lock; released when dropped
///
/// Not `Send`: lock-file ownership is recorded per thread, so the guard must
/// be dropped on the thread that acquired it.
pub struct LockGuard {
    name: String,
    path: PathBuf,
    held: Held,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard {
    fn native(name: &str, path: &Path, file: File) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            held: Held::Native { file },
            _not_send: PhantomData,
        }
    }

    fn lock_file(semaphore: LockFileSemaphore) -> Self {
        Self {
            name: semaphore.name().to_string(),
            path: semaphore.path().to_path_buf(),
            held: Held::LockFile { semaphore },
            _not_send: PhantomData,
        }
    }

    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when backed by the OS advisory lock
    pub fn is_native(&self) -> bool {
        matches!(self.held, Held::Native { .. })
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("native", &self.is_native())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &self.held {
            Held::Native { file } => {
                if let Err(e) = native::unlock(file) {
                    debug!("Failed to unlock {}: {}", self.path.display(), e);
                }
            }
            Held::LockFile { semaphore } => semaphore.release(),
        }
        debug!("Released lock {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn options(dir: &Path, strategy: LockStrategy) -> LockOptions {
        LockOptions {
            directory: dir.to_path_buf(),
            strategy,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            wait_notice_after: Duration::from_secs(3),
            max_wait: None,
        }
    }

    struct Alive(bool);

    impl ProcessFinder for Alive {
        fn is_running(&self, _process_id: u32, _process_name: &str) -> bool {
            self.0
        }
    }

    fn manual_lock(dir: &Path, strategy: LockStrategy, alive: bool) -> (CrossProcessLock, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let opts = options(dir, strategy);
        let lock = CrossProcessLock::with_dependencies(
            opts.clone(),
            Arc::new(FsLockIo::new(opts.directory)),
            Arc::new(Alive(alive)),
            clock.clone(),
        );
        (lock, clock)
    }

    #[test]
    fn native_guard_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let locks = CrossProcessLock::new(options(dir.path(), LockStrategy::Native));

        let guard = locks.acquire("journal", "waiting").unwrap();
        assert!(guard.is_native());
        drop(guard);

        let again = locks
            .acquire_within("journal", "waiting", Duration::from_millis(200))
            .unwrap();
        assert_eq!(again.name(), "journal");
    }

    #[test]
    fn lock_file_guard_deletes_file_on_drop() {
        let dir = TempDir::new().unwrap();
        let locks = CrossProcessLock::new(options(dir.path(), LockStrategy::LockFile));

        let guard = locks.acquire("journal", "waiting").unwrap();
        let path = guard.path().to_path_buf();
        assert!(!guard.is_native());
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn budget_exhaustion_is_a_timeout() {
        let dir = TempDir::new().unwrap();
        let (locks, clock) = manual_lock(dir.path(), LockStrategy::LockFile, true);

        // Held by a live foreign owner with a fresh timestamp
        let io = FsLockIo::new(dir.path());
        let foreign = LockRecord::new(1, 1, "other", clock.now());
        assert!(io.write(&io.lock_path("journal"), &foreign));

        let err = locks
            .acquire_within("journal", "waiting", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, PkgCacheError::LockTimeout { ref name, .. } if name == "journal"));
    }

    #[test]
    fn stale_foreign_lock_is_taken_after_timeout() {
        let dir = TempDir::new().unwrap();
        let (locks, clock) = manual_lock(dir.path(), LockStrategy::LockFile, true);

        let io = FsLockIo::new(dir.path());
        let foreign = LockRecord::new(1, 1, "other", clock.now());
        assert!(io.write(&io.lock_path("journal"), &foreign));

        // Manual clock: each poll advances 100ms, so the 30s timeout passes
        let guard = locks.acquire("journal", "waiting").unwrap();
        assert!(clock.now() - foreign.acquired_at_utc > chrono::Duration::seconds(30));
        assert!(matches!(
            io.read(guard.path()),
            LockFileState::Held(r) if r.process_id == std::process::id()
        ));
    }

    #[test]
    fn dead_owner_is_taken_without_waiting() {
        let dir = TempDir::new().unwrap();
        let (locks, clock) = manual_lock(dir.path(), LockStrategy::LockFile, false);
        let start = clock.now();

        let io = FsLockIo::new(dir.path());
        assert!(io.write(&io.lock_path("journal"), &LockRecord::new(1, 1, "other", start)));

        let _guard = locks.acquire("journal", "waiting").unwrap();
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn waiter_blocks_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let released = Arc::new(AtomicBool::new(false));

        let locks = CrossProcessLock::new(options(&path, LockStrategy::Native));
        let guard = locks.acquire("journal", "waiting").unwrap();

        let waiter = {
            let released = released.clone();
            std::thread::spawn(move || {
                let locks = CrossProcessLock::new(options(&path, LockStrategy::Native));
                let _guard = locks.acquire("journal", "waiting").unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        std::thread::sleep(Duration::from_millis(300));
        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.join().unwrap(), "waiter got the lock before it was released");
    }

    #[test]
    fn auto_keeps_waiting_when_native_lock_fails() {
        let dir = TempDir::new().unwrap();
        let (locks, _clock) = manual_lock(dir.path(), LockStrategy::Auto, true);

        // Opening a directory fails with something other than "unsupported"
        fs::create_dir_all(NativeLock::new(dir.path(), "journal").path()).unwrap();

        let err = locks
            .acquire_within("journal", "waiting", Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, PkgCacheError::LockTimeout { .. }));
        assert!(!FsLockIo::new(dir.path()).lock_path("journal").exists());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap()).matches(needle).count()
        }
    }

    fn wait_on_live_foreign_lock(budget: Duration) -> Captured {
        let dir = TempDir::new().unwrap();
        let (locks, clock) = manual_lock(dir.path(), LockStrategy::LockFile, true);
        let io = FsLockIo::new(dir.path());
        assert!(io.write(&io.lock_path("journal"), &LockRecord::new(1, 1, "other", clock.now())));

        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let result = locks.acquire_within("journal", "journal busy elsewhere", budget);
            assert!(matches!(result, Err(PkgCacheError::LockTimeout { .. })));
        });
        logs
    }

    #[test]
    fn waiting_notice_is_logged_once() {
        // 3s notice, 10s budget, 100ms polls on the manual clock
        let logs = wait_on_live_foreign_lock(Duration::from_secs(10));
        assert_eq!(logs.count("journal busy elsewhere"), 1);
    }

    #[test]
    fn short_waits_stay_quiet() {
        let logs = wait_on_live_foreign_lock(Duration::from_secs(2));
        assert_eq!(logs.count("journal busy elsewhere"), 0);
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let locks = CrossProcessLock::new(options(dir.path(), LockStrategy::Auto));
        assert!(locks.acquire("", "waiting").is_err());
    }

    #[test]
    fn strategy_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&LockStrategy::LockFile).unwrap(),
            "\"lock-file\""
        );
        assert_eq!(LockStrategy::Auto.to_string(), "auto");
    }
}
