//! pkgcache - package retention journal
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pkgcache::cli::args::LogFormat;
use pkgcache::cli::{commands, Cli, Commands};
use pkgcache::config::ConfigManager;
use pkgcache::error::PkgCacheResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// sysexits EX_TEMPFAIL: the agent may retry the same command
const EXIT_TEMPFAIL: u8 = 75;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if e.is_retryable() {
                ExitCode::from(EXIT_TEMPFAIL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run() -> PkgCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("pkgcache=warn"),
        1 => EnvFilter::new("pkgcache=info"),
        _ => EnvFilter::new("pkgcache=debug"),
    };

    let log_format = cli.log_format.unwrap_or(if config.general.log_format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    // Logs go to stderr so list/retain output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.without_time().init(),
    }
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Register(args) => commands::register(args, &config).await,
        Commands::Release(args) => commands::release(args, &config).await,
        Commands::Retain(args) => commands::retain(args, &config).await,
        Commands::List(args) => commands::list(args, &config).await,
        Commands::ExpireLocks(args) => commands::expire_locks(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}
