//! Least-frequently-used-with-aging ranking
//!
//! `score = uses * 0.5^(idle / half_life) / (1 + newer_version_weight)^newer_versions`
//!
//! Lower scores are evicted first. A large historical usage count keeps an
//! entry around, but its weight halves every `half_life` the entry sits idle.

use crate::clock::elapsed_between;
use crate::journal::JournalEntry;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

/// Ranks unlocked entries, least valuable first
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeastFrequentlyUsedWithAging {
    half_life: Duration,
    newer_version_weight: f64,
}

impl Default for LeastFrequentlyUsedWithAging {
    fn default() -> Self {
        Self {
            half_life: Duration::from_secs(168 * 3600),
            newer_version_weight: 1.0,
        }
    }
}

impl LeastFrequentlyUsedWithAging {
    pub fn new(half_life: Duration, newer_version_weight: f64) -> Self {
        Self {
            half_life,
            newer_version_weight: newer_version_weight.max(0.0),
        }
    }

    /// Decay half-life
    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    /// Desirability of `entry` at `now`, given how many newer versions of it are cached
    pub fn score(&self, entry: &JournalEntry, newer_versions: usize, now: DateTime<Utc>) -> f64 {
        let uses = entry.usage_count() as f64;
        let idle = entry
            .last_used()
            .map_or(Duration::ZERO, |last| elapsed_between(last, now));

        let decay = if self.half_life.is_zero() {
            if idle.is_zero() {
                1.0
            } else {
                0.0
            }
        } else {
            0.5_f64.powf(idle.as_secs_f64() / self.half_life.as_secs_f64())
        };

        let newer_versions = i32::try_from(newer_versions).unwrap_or(i32::MAX);
        let superseded = (1.0 + self.newer_version_weight).powi(newer_versions);
        uses * decay / superseded
    }

    /// Unlocked entries in eviction order
    pub fn rank<'e>(
        &self,
        entries: &[&'e JournalEntry],
        now: DateTime<Utc>,
    ) -> Vec<&'e JournalEntry> {
        let newer = newer_version_counts(entries);

        let mut scored: Vec<(f64, &'e JournalEntry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_locked())
            .map(|(i, e)| (self.score(e, newer[i], now), *e))
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| {
            a_score
                .partial_cmp(b_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.last_used().cmp(&b.last_used()))
                .then_with(|| a.package().id_key().cmp(&b.package().id_key()))
                .then_with(|| a.package().version().cmp(b.package().version()))
        });

        scored.into_iter().map(|(_, e)| e).collect()
    }
}

/// For each entry, the number of cached entries of the same package with a higher version
fn newer_version_counts(entries: &[&JournalEntry]) -> Vec<usize> {
    let mut by_package: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        let key = format!(
            "{}\u{0}{}",
            entry.package().id_key(),
            entry.package().extension().to_ascii_lowercase()
        );
        by_package.entry(key).or_default().push(i);
    }

    let mut counts = vec![0; entries.len()];
    for indexes in by_package.values() {
        for &i in indexes {
            let version = entries[i].package().version();
            counts[i] = indexes
                .iter()
                .filter(|&&j| entries[j].package().version() > version)
                .count();
        }
    }
    counts
}
