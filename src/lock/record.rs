//! Lock file contents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every lock record
pub const LOCK_RECORD_VERSION: u32 = 1;

/// Who holds a file-based lock, and since when
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Record schema version
    pub version: u32,

    /// OS process id of the owner
    pub process_id: u32,

    /// Process-unique thread id of the owner
    pub thread_id: u64,

    /// Executable name of the owner, used to spot pid reuse
    pub process_name: String,

    /// When the lock was taken or last refreshed
    pub acquired_at_utc: DateTime<Utc>,
}

impl LockRecord {
    /// Create a record for the given owner
    pub fn new(
        process_id: u32,
        thread_id: u64,
        process_name: impl Into<String>,
        acquired_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            version: LOCK_RECORD_VERSION,
            process_id,
            thread_id,
            process_name: process_name.into(),
            acquired_at_utc,
        }
    }

    /// Same process and thread, regardless of timestamp
    pub fn same_owner(&self, other: &LockRecord) -> bool {
        self.process_id == other.process_id && self.thread_id == other.thread_id
    }

    /// Parse a record, rejecting versions this build does not understand
    pub fn parse(content: &str) -> Result<Self, String> {
        let record: LockRecord = serde_json::from_str(content).map_err(|e| e.to_string())?;
        if record.version != LOCK_RECORD_VERSION {
            return Err(format!("unsupported lock record version {}", record.version));
        }
        Ok(record)
    }
}

/// What was found at a lock file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockFileState {
    /// No lock file
    Missing,

    /// A valid record
    Held(LockRecord),

    /// The file exists but its contents could not be parsed
    Unreadable { modified_at: DateTime<Utc> },

    /// The file exists but could not be opened (sharing violation, permissions)
    Inaccessible { modified_at: DateTime<Utc> },
}
