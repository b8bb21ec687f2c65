//! Percent-free-disk-space retention

use crate::error::PkgCacheResult;
use crate::journal::JournalEntry;
use crate::retention::{RetentionAlgorithm, RetentionContext};
use tracing::{debug, info, warn};

/// Evicts until the cache volume has at least `percent_free` of its capacity free
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentFreeDiskSpaceCleaner {
    percent_free: f64,
    buffer_percent: f64,
}

impl PercentFreeDiskSpaceCleaner {
    /// `percent_free` is clamped to 0..=100
    pub fn new(percent_free: f64) -> Self {
        Self {
            percent_free: percent_free.clamp(0.0, 100.0),
            buffer_percent: 0.0,
        }
    }

    /// Free this much more than strictly needed, as a percentage of the shortfall
    pub fn with_buffer_percent(mut self, buffer_percent: f64) -> Self {
        self.buffer_percent = buffer_percent.max(0.0);
        self
    }

    pub fn percent_free(&self) -> f64 {
        self.percent_free
    }
}

impl RetentionAlgorithm for PercentFreeDiskSpaceCleaner {
    fn name(&self) -> &'static str {
        "free-space"
    }

    fn select_entries_to_remove<'e>(
        &self,
        ranked: &[&'e JournalEntry],
        ctx: &RetentionContext<'_>,
    ) -> PkgCacheResult<Vec<&'e JournalEntry>> {
        let space = ctx.disk.space(ctx.cache_dir).inspect_err(|e| {
            warn!("Unable to determine disk space for the package cache: {}", e);
        })?;

        if space.percent_free_with(ctx.selected_bytes) >= self.percent_free {
            debug!(
                "Detected enough space for new packages ({} of {} bytes free)",
                space.free_bytes, space.total_bytes
            );
            return Ok(Vec::new());
        }

        let desired = (space.total_bytes as f64 * self.percent_free / 100.0).ceil() as u64;
        let shortfall = desired
            .saturating_sub(space.free_bytes)
            .saturating_sub(ctx.selected_bytes);
        let to_free = (shortfall as f64 * (100.0 + self.buffer_percent) / 100.0).ceil() as u64;
        debug!("Cleaning {} bytes from the package cache", to_free);

        let mut freed = 0u64;
        let mut selected = Vec::new();
        for entry in ranked {
            if freed >= to_free {
                break;
            }
            freed = freed.saturating_add(entry.file_size_bytes());
            selected.push(*entry);
        }

        if freed < to_free {
            info!(
                "Removing every unlocked package frees {} bytes, short of the {} bytes needed for {}% free space",
                freed, to_free, self.percent_free
            );
        }

        Ok(selected)
    }
}
