//! Expire-locks command - release usage locks abandoned by crashed tasks

use super::run_blocking;
use crate::cli::args::ExpireLocksArgs;
use crate::config::Config;
use crate::error::{PkgCacheError, PkgCacheResult};
use crate::ui::{self, UiContext};
use std::time::Duration;

/// Execute the expire-locks command
pub async fn execute(args: ExpireLocksArgs, config: &Config) -> PkgCacheResult<()> {
    let ctx = UiContext::detect();
    let max_age = args
        .older_than_hours
        .map(|hours| Duration::from_secs(hours * 3600))
        .or_else(|| config.retention.stale_usage_lock_age())
        .ok_or_else(|| {
            PkgCacheError::User(
                "No lock age given; pass --older-than-hours or set retention.stale_usage_lock_hours"
                    .to_string(),
            )
        })?;

    let expired =
        run_blocking(config, move |journal| Ok(journal.expire_stale_locks(max_age))).await?;

    if expired == 0 {
        ui::step_info(&ctx, "No stale usage locks");
    } else {
        ui::step_ok(&ctx, &format!("Expired {} usage lock(s)", expired));
    }
    Ok(())
}
