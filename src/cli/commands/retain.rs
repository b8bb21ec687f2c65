//! Retain command - evict unused packages according to the retention policy

use super::run_blocking;
use crate::cli::args::{OutputFormat, RetainArgs};
use crate::config::Config;
use crate::error::PkgCacheResult;
use crate::journal::{JournalEntry, RetentionReport};
use crate::ui::{self, UiContext};
use console::style;
use tracing::debug;

/// Execute the retain command
pub async fn execute(args: RetainArgs, config: &Config) -> PkgCacheResult<()> {
    let ctx = UiContext::detect();
    let algorithms = config.retention.algorithms();

    if algorithms.is_empty() {
        debug!("No retention algorithms enabled");
        match args.format {
            OutputFormat::Json => {
                let empty = RetentionReport::default();
                println!("{}", serde_json::to_string_pretty(&empty)?);
            }
            OutputFormat::Plain => {}
            OutputFormat::Table => ui::step_info(&ctx, "Package retention is disabled"),
        }
        return Ok(());
    }

    if args.dry_run {
        let planned =
            run_blocking(config, move |journal| journal.plan_retention(&algorithms)).await?;
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&planned)?),
            OutputFormat::Plain => print_plain(&planned),
            OutputFormat::Table => {
                ui::intro(&ctx, "Retention plan");
                if planned.is_empty() {
                    ui::step_info(&ctx, "Nothing to remove");
                } else {
                    print_table(&planned);
                    ui::remark(&ctx, "Dry run, nothing was deleted");
                }
            }
        }
        return Ok(());
    }

    let report =
        run_blocking(config, move |journal| journal.apply_retention(&algorithms)).await?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => print_plain(&report.removed),
        OutputFormat::Table => print_report(&ctx, &report),
    }
    Ok(())
}

fn print_report(ctx: &UiContext, report: &RetentionReport) {
    ui::intro(ctx, "Package retention");

    if report.expired_locks > 0 {
        ui::step_info(
            ctx,
            &format!("Expired {} stale usage lock(s)", report.expired_locks),
        );
    }

    if report.removed.is_empty() {
        ui::step_info(ctx, "Nothing to remove");
    } else {
        print_table(&report.removed);
        ui::step_ok_detail(
            ctx,
            &format!("Removed {} package(s)", report.removed.len()),
            &ui::format_bytes(report.freed_bytes),
        );
    }

    for entry in &report.failed {
        ui::step_warn_hint(
            ctx,
            &format!("Could not delete {}", entry.package()),
            &entry.cache_file_path().display().to_string(),
        );
    }
}

fn print_table(entries: &[JournalEntry]) {
    println!(
        "{:<40} {:<16} {:>10} {:>6}",
        style("PACKAGE").bold(),
        style("VERSION").bold(),
        style("SIZE").bold(),
        style("USES").bold()
    );
    println!("{}", "-".repeat(75));

    for entry in entries {
        println!(
            "{:<40} {:<16} {:>10} {:>6}",
            entry.package().id(),
            entry.package().version().to_string(),
            ui::format_bytes(entry.file_size_bytes()),
            entry.usage_count()
        );
    }
    println!();
}

fn print_plain(entries: &[JournalEntry]) {
    for entry in entries {
        println!("{}", entry.cache_file_path().display());
    }
}
