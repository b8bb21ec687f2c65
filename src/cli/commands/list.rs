//! List command - show journal entries

use super::run_blocking;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::PkgCacheResult;
use crate::journal::JournalEntry;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> PkgCacheResult<()> {
    let entries = run_blocking(config, |journal| journal.entries()).await?;

    let filtered: Vec<_> = if args.locked {
        entries.into_iter().filter(|e| e.is_locked()).collect()
    } else {
        entries
    };

    if filtered.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No packages in the journal");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&filtered),
        OutputFormat::Json => print_json(&filtered)?,
        OutputFormat::Plain => print_plain(&filtered),
    }

    Ok(())
}

fn print_table(entries: &[JournalEntry]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Cached packages");

    println!(
        "{:<36} {:<14} {:>10} {:>5} {:<9} {:<16}",
        style("PACKAGE").bold(),
        style("VERSION").bold(),
        style("SIZE").bold(),
        style("USES").bold(),
        style("STATUS").bold(),
        style("LAST USED").bold()
    );
    println!("{}", "-".repeat(95));

    for entry in entries {
        let status = if entry.is_locked() {
            style("in use").yellow()
        } else {
            style("idle").dim()
        };
        let last_used = entry
            .last_used()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        println!(
            "{:<36} {:<14} {:>10} {:>5} {:<9} {:<16}",
            entry.package().id(),
            entry.package().version().to_string(),
            ui::format_bytes(entry.file_size_bytes()),
            entry.usage_count(),
            status,
            last_used
        );
    }

    let total: u64 = entries.iter().map(JournalEntry::file_size_bytes).sum();
    println!();
    println!("{} package(s), {}", entries.len(), ui::format_bytes(total));
}

fn print_json(entries: &[JournalEntry]) -> PkgCacheResult<()> {
    let json = serde_json::to_string_pretty(entries)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(entries: &[JournalEntry]) {
    for entry in entries {
        println!("{}", entry.package());
    }
}
