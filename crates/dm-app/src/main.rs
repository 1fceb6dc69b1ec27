use std::path::Path;

use anyhow::{Result, bail};
use clap::Parser;
use dm_core::config::DmConfig;

pub mod app;
pub mod check;
pub mod cli;
pub mod hotreload;
pub mod refcmd;
pub mod shell;
pub mod stats;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.level_filter())
        .format_timestamp(None)
        .init();

    let config = resolve_config(&cli.config)?;

    match cli.command {
        Command::Cli => shell::Shell::new(config).run(std::io::stdin().lock(), &mut std::io::stdout()),
        Command::Stats { path } => {
            let entries = stats::gather(&path, &config.dataset)?;
            stats::print_table(&entries, &mut std::io::stdout())?;
            Ok(())
        }
        Command::Check { target, channels } => {
            let report = check::check_target(&target, channels, &config.dataset)?;
            report.print(&mut std::io::stdout())?;
            if !report.is_ok() {
                bail!("{} failed its integrity check", target.display());
            }
            Ok(())
        }
        Command::Ref(args) => {
            let outcome = refcmd::run(&args, &config)?;
            println!("{}", outcome.display());
            Ok(())
        }
        Command::Vis(args) => app::run(&args, config, &cli.config, cli.debug),
    }
}

/// Load `path`, or fall back to defaults when it does not exist.
fn resolve_config(path: &Path) -> Result<DmConfig> {
    if path.exists() {
        dm_core::config::load_config(path)
    } else {
        log::warn!("config {} not found, using defaults", path.display());
        Ok(DmConfig::default())
    }
}
