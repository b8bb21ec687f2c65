//! Package-quantity retention

use crate::error::PkgCacheResult;
use crate::journal::JournalEntry;
use crate::retention::{RetentionAlgorithm, RetentionContext};
use std::collections::HashMap;
use tracing::debug;

/// Caps the number of cached packages, and optionally the versions kept per package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageQuantityCleaner {
    max_packages: Option<usize>,
    max_versions_per_package: Option<usize>,
}

impl PackageQuantityCleaner {
    /// Keep at most `max_packages` entries in total
    pub fn new(max_packages: usize) -> Self {
        Self {
            max_packages: Some(max_packages),
            max_versions_per_package: None,
        }
    }

    /// Only limit versions per package
    pub fn versions_only(max_versions_per_package: usize) -> Self {
        Self {
            max_packages: None,
            max_versions_per_package: Some(max_versions_per_package),
        }
    }

    /// Also keep at most `max_versions` of each package (newest first)
    pub fn with_max_versions_per_package(mut self, max_versions: usize) -> Self {
        self.max_versions_per_package = Some(max_versions);
        self
    }
}

impl RetentionAlgorithm for PackageQuantityCleaner {
    fn name(&self) -> &'static str {
        "quantity"
    }

    fn select_entries_to_remove<'e>(
        &self,
        ranked: &[&'e JournalEntry],
        ctx: &RetentionContext<'_>,
    ) -> PkgCacheResult<Vec<&'e JournalEntry>> {
        let mut selected: Vec<&'e JournalEntry> = Vec::new();

        if let Some(max_versions) = self.max_versions_per_package {
            let surplus = surplus_versions(ctx.entries, max_versions);
            selected.extend(
                ranked
                    .iter()
                    .filter(|e| surplus.iter().any(|s| s.package() == e.package()))
                    .copied(),
            );
            if !selected.is_empty() {
                debug!(
                    "Found cached packages with more than {} versions; {} versions will be removed",
                    max_versions,
                    selected.len()
                );
            }
        }

        if let Some(max_packages) = self.max_packages {
            let remaining = ctx.entries.len().saturating_sub(selected.len());
            let excess = remaining.saturating_sub(max_packages);
            if excess > 0 {
                debug!(
                    "Cache holds {} packages, more than the {} to keep",
                    remaining, max_packages
                );
                let extra: Vec<&'e JournalEntry> = ranked
                    .iter()
                    .filter(|e| !selected.iter().any(|s| s.package() == e.package()))
                    .take(excess)
                    .copied()
                    .collect();
                selected.extend(extra);
            }
        }

        Ok(selected)
    }
}

/// Entries beyond the newest `max_versions` of their package
fn surplus_versions<'c>(
    entries: &[&'c JournalEntry],
    max_versions: usize,
) -> Vec<&'c JournalEntry> {
    let mut by_package: HashMap<String, Vec<&'c JournalEntry>> = HashMap::new();
    for &entry in entries {
        let key = format!(
            "{}\u{0}{}",
            entry.package().id_key(),
            entry.package().extension().to_ascii_lowercase()
        );
        by_package.entry(key).or_default().push(entry);
    }

    by_package
        .into_values()
        .flat_map(|mut versions| {
            versions.sort_by(|a, b| b.package().version().cmp(a.package().version()));
            versions.into_iter().skip(max_versions)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::testing::{entry, locked, now};
    use crate::retention::FixedDiskSpace;
    use chrono::Duration;
    use std::path::Path;

    fn select(
        cleaner: PackageQuantityCleaner,
        ranked: &[&JournalEntry],
        all: &[&JournalEntry],
    ) -> Vec<String> {
        let disk = FixedDiskSpace::new(100, 100);
        let ctx = RetentionContext {
            cache_dir: Path::new("/cache"),
            disk: &disk,
            entries: all,
            selected_bytes: 0,
            now: now(),
        };
        cleaner
            .select_entries_to_remove(ranked, &ctx)
            .unwrap()
            .iter()
            .map(|e| format!("{}@{}", e.package().id(), e.package().version()))
            .collect()
    }

    #[test]
    fn under_cap_removes_nothing() {
        let a = entry("a", "1.0", 1, 1, Duration::days(1));
        let b = entry("b", "1.0", 1, 1, Duration::days(1));
        let all = [&a, &b];

        assert!(select(PackageQuantityCleaner::new(2), &all, &all).is_empty());
    }

    #[test]
    fn removes_front_of_ranking_down_to_cap() {
        let a = entry("a", "1.0", 1, 1, Duration::days(1));
        let b = entry("b", "1.0", 1, 1, Duration::days(1));
        let c = entry("c", "1.0", 1, 1, Duration::days(1));
        let all = [&a, &b, &c];

        assert_eq!(select(PackageQuantityCleaner::new(1), &all, &all), vec!["a@1.0", "b@1.0"]);
    }

    #[test]
    fn locked_entries_count_but_are_not_removed() {
        let held = locked("held", "1.0", 1);
        let a = entry("a", "1.0", 1, 1, Duration::days(1));
        let b = entry("b", "1.0", 1, 1, Duration::days(1));
        let all = [&held, &a, &b];
        let ranked = [&a, &b];

        assert_eq!(select(PackageQuantityCleaner::new(2), &ranked, &all), vec!["a@1.0"]);
        // Cap 0 cannot touch the locked entry
        assert_eq!(
            select(PackageQuantityCleaner::new(0), &ranked, &all),
            vec!["a@1.0", "b@1.0"]
        );
    }

    #[test]
    fn keeps_newest_versions_per_package() {
        let v1 = entry("web", "1.0", 1, 5, Duration::hours(1));
        let v2 = entry("web", "2.0", 1, 1, Duration::hours(1));
        let v3 = entry("web", "3.0", 1, 1, Duration::hours(1));
        let other = entry("api", "1.0", 1, 1, Duration::hours(1));
        let all = [&v1, &v2, &v3, &other];
        let ranked = [&v2, &v3, &other, &v1];

        assert_eq!(
            select(PackageQuantityCleaner::versions_only(2), &ranked, &all),
            vec!["web@1.0"]
        );
    }

    #[test]
    fn locked_versions_count_toward_the_limit() {
        let v1 = entry("web", "1.0", 1, 1, Duration::hours(1));
        let v2 = locked("web", "2.0", 1);
        let all = [&v1, &v2];
        let ranked = [&v1];

        assert_eq!(
            select(PackageQuantityCleaner::versions_only(1), &ranked, &all),
            vec!["web@1.0"]
        );
    }

    #[test]
    fn version_removals_count_toward_cap() {
        let v1 = entry("web", "1.0", 1, 1, Duration::hours(1));
        let v2 = entry("web", "2.0", 1, 1, Duration::hours(1));
        let a = entry("a", "1.0", 1, 1, Duration::hours(1));
        let b = entry("b", "1.0", 1, 1, Duration::hours(1));
        let all = [&v1, &v2, &a, &b];
        let ranked = [&a, &v1, &b, &v2];

        let cleaner = PackageQuantityCleaner::new(2).with_max_versions_per_package(1);
        assert_eq!(select(cleaner, &ranked, &all), vec!["web@1.0", "a@1.0"]);
    }
}
