//! Register command - record that a task is using a cached package

use super::{absolute, resolve_task, run_blocking};
use crate::cli::args::{PackageArgs, RegisterArgs};
use crate::config::Config;
use crate::error::PkgCacheResult;
use crate::journal::PackageIdentity;
use crate::ui::{self, UiContext};

/// Execute the register command
pub async fn execute(args: RegisterArgs, config: &Config) -> PkgCacheResult<()> {
    let ctx = UiContext::detect();
    let package = identity(&args.package)?;
    let task = resolve_task(args.task)?;
    let path = absolute(&args.path)?;

    let label = package.to_string();
    let registered = run_blocking(config, move |journal| {
        Ok(journal.register_package_use(&package, &path, &task))
    })
    .await?;

    // A deployment must not fail because bookkeeping did
    if registered {
        ui::step_ok(&ctx, &format!("Registered {}", label));
    } else {
        ui::step_warn_hint(
            &ctx,
            &format!("Could not register {}", label),
            "the package may be removed by a later retention pass",
        );
    }
    Ok(())
}

fn identity(args: &PackageArgs) -> PkgCacheResult<PackageIdentity> {
    PackageIdentity::new(
        args.package.clone(),
        &args.version,
        args.format.into(),
        args.extension.clone(),
    )
}
