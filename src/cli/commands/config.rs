//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::PkgCacheResult;
use crate::ui::{self, UiContext};

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> PkgCacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
    }
    Ok(())
}

fn show_config(config: &Config) -> PkgCacheResult<()> {
    let ctx = UiContext::detect();
    if ctx.use_fancy_output() {
        ui::key_value(&ctx, "Journal", &config.journal.path().display().to_string());
        ui::key_value(
            &ctx,
            "Cache",
            &config.journal.cache_directory.display().to_string(),
        );
        println!();
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}
