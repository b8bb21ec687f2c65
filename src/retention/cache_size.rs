//! Total cache size retention

use crate::error::PkgCacheResult;
use crate::journal::JournalEntry;
use crate::retention::{RetentionAlgorithm, RetentionContext};
use tracing::debug;

/// Evicts until the cached files add up to at most `max_cache_bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizeCleaner {
    max_cache_bytes: u64,
}

impl CacheSizeCleaner {
    pub fn new(max_cache_bytes: u64) -> Self {
        Self { max_cache_bytes }
    }

    /// Cap given in mebibytes
    pub fn from_megabytes(max_cache_mb: u64) -> Self {
        Self::new(max_cache_mb.saturating_mul(1024 * 1024))
    }
}

impl RetentionAlgorithm for CacheSizeCleaner {
    fn name(&self) -> &'static str {
        "cache-size"
    }

    fn select_entries_to_remove<'e>(
        &self,
        ranked: &[&'e JournalEntry],
        ctx: &RetentionContext<'_>,
    ) -> PkgCacheResult<Vec<&'e JournalEntry>> {
        let mut total: u64 = ctx.entries.iter().map(|e| e.file_size_bytes()).sum();
        if total <= self.max_cache_bytes {
            return Ok(Vec::new());
        }

        debug!(
            "Package cache holds {} bytes, more than the {} byte limit",
            total, self.max_cache_bytes
        );
        Ok(ranked
            .iter()
            .take_while(|entry| {
                let over = total > self.max_cache_bytes;
                total = total.saturating_sub(entry.file_size_bytes());
                over
            })
            .copied()
            .collect())
    }
}
