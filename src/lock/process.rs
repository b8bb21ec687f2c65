//! Process identity and liveness checks
//!
//! Used by the lock-file protocol to stamp lock records with their owner and to
//! tell whether a recorded owner is still alive.

use crate::clock::Clock;
use crate::lock::record::LockRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Linux truncates `/proc/<pid>/comm` to this many bytes
#[cfg(target_os = "linux")]
const COMM_LEN: usize = 15;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Numeric id of the calling thread, unique within this process
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Executable name of this process
pub fn current_process_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string())
    })
}

/// Lock record naming the calling process and thread as owner
pub fn current_owner(clock: &dyn Clock) -> LockRecord {
    LockRecord::new(
        std::process::id(),
        current_thread_id(),
        current_process_name(),
        clock.now(),
    )
}

/// Answers whether a process is still running
pub trait ProcessFinder: Send + Sync {
    /// True if a process with this id (and, where checkable, this name) is alive
    fn is_running(&self, process_id: u32, process_name: &str) -> bool;
}

/// Liveness from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessFinder;

impl ProcessFinder for SystemProcessFinder {
    fn is_running(&self, process_id: u32, process_name: &str) -> bool {
        if process_id == std::process::id() {
            return true;
        }
        pid_alive(process_id) && name_matches(process_id, process_name)
    }
}

#[cfg(unix)]
fn pid_alive(process_id: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(process_id) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 performs the permission and existence checks without signalling
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_process_id: u32) -> bool {
    // No cheap check here; stale locks are recovered by the timeout instead
    true
}

#[cfg(target_os = "linux")]
fn name_matches(process_id: u32, process_name: &str) -> bool {
    if process_name.is_empty() {
        return true;
    }
    match std::fs::read_to_string(format!("/proc/{}/comm", process_id)) {
        Ok(comm) => {
            let comm = comm.trim_end();
            let expected: String = truncate_bytes(process_name, COMM_LEN);
            comm == expected
        }
        // Process vanished or /proc is hidden; trust the pid check
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn name_matches(_process_id: u32, _process_name: &str) -> bool {
    true
}

#[cfg(target_os = "linux")]
fn truncate_bytes(s: &str, max: usize) -> String {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
