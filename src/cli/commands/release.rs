//! Release command - end a task's use of one or all packages

use super::{resolve_task, run_blocking};
use crate::cli::args::ReleaseArgs;
use crate::config::Config;
use crate::error::{PkgCacheError, PkgCacheResult};
use crate::journal::PackageIdentity;
use crate::ui::{self, UiContext};

/// Execute the release command
pub async fn execute(args: ReleaseArgs, config: &Config) -> PkgCacheResult<()> {
    let ctx = UiContext::detect();
    let task = resolve_task(args.task.clone())?;

    if args.all {
        let label = task.to_string();
        let released =
            run_blocking(config, move |journal| Ok(journal.release_all_for_task(&task))).await?;
        ui::step_ok_detail(
            &ctx,
            &format!("Released {} package(s)", released),
            &label,
        );
        return Ok(());
    }

    let package = match (args.package, args.version) {
        (Some(id), Some(version)) => {
            PackageIdentity::new(id, &version, args.format.into(), args.extension)?
        }
        _ => {
            return Err(PkgCacheError::User(
                "Pass --package and --version, or --all".to_string(),
            ))
        }
    };

    let label = package.to_string();
    let released = run_blocking(config, move |journal| {
        Ok(journal.release_package_use(&package, &task))
    })
    .await?;

    if released {
        ui::step_ok(&ctx, &format!("Released {}", label));
    } else {
        ui::step_info(&ctx, &format!("{} was not held by this task", label));
    }
    Ok(())
}
