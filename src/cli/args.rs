//! CLI argument definitions using clap derive

use crate::journal::VersionFormat;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// pkgcache - package retention journal for deployment agents
///
/// Records which deployment tasks use which cached packages, and evicts
/// unused packages when the cache volume runs short of space.
#[derive(Parser, Debug)]
#[command(name = "pkgcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PKGCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format (default: general.log_format from config)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record that a task is using a cached package
    Register(RegisterArgs),

    /// Release a task's use of a package
    Release(ReleaseArgs),

    /// Run a retention pass over the cache
    Retain(RetainArgs),

    /// List journal entries
    List(ListArgs),

    /// Release usage locks left behind by tasks that never finished
    ExpireLocks(ExpireLocksArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Identifies a cached package
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Package id
    #[arg(short, long = "package")]
    pub package: String,

    /// Package version
    #[arg(long = "version")]
    pub version: String,

    /// How the version is compared
    #[arg(long, default_value = "semver")]
    pub format: VersionFormatArg,

    /// Package file extension
    #[arg(short, long, default_value = "zip")]
    pub extension: String,
}

/// Arguments for the register command
#[derive(Parser, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Cached package file
    #[arg(long)]
    pub path: PathBuf,

    /// Deployment task id (defaults to $PKGCACHE_TASK_ID)
    #[arg(short, long)]
    pub task: Option<String>,
}

/// Arguments for the release command
#[derive(Parser, Debug)]
pub struct ReleaseArgs {
    /// Package id
    #[arg(short, long = "package", required_unless_present = "all")]
    pub package: Option<String>,

    /// Package version
    #[arg(long = "version", required_unless_present = "all")]
    pub version: Option<String>,

    /// How the version is compared
    #[arg(long, default_value = "semver")]
    pub format: VersionFormatArg,

    /// Package file extension
    #[arg(short, long, default_value = "zip")]
    pub extension: String,

    /// Release every package the task holds
    #[arg(long, conflicts_with_all = ["package", "version"])]
    pub all: bool,

    /// Deployment task id (defaults to $PKGCACHE_TASK_ID)
    #[arg(short, long)]
    pub task: Option<String>,
}

/// Arguments for the retain command
#[derive(Parser, Debug)]
pub struct RetainArgs {
    /// Show what would be removed without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only show packages currently in use
    #[arg(short, long)]
    pub locked: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the expire-locks command
#[derive(Parser, Debug)]
pub struct ExpireLocksArgs {
    /// Release locks acquired more than N hours ago (default: from config)
    #[arg(long)]
    pub older_than_hours: Option<u64>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Version comparison rules
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VersionFormatArg {
    Semver,
    Maven,
}

impl From<VersionFormatArg> for VersionFormat {
    fn from(arg: VersionFormatArg) -> Self {
        match arg {
            VersionFormatArg::Semver => VersionFormat::Semver,
            VersionFormatArg::Maven => VersionFormat::Maven,
        }
    }
}
