//! Stratum - build-graph composition engine
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use stratum::cli::args::{ConfigAction, ConfigArgs};
use stratum::cli::{Cli, Commands};
use stratum::config::{Config, ConfigManager};
use stratum::error::{StratumError, StratumResult};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(e: &StratumError) {
    if let StratumError::Validation { ref problems, .. } = e {
        if problems.len() > 1 {
            eprintln!("{} {} problem(s) found", style("Error:").red().bold(), problems.len());
            for problem in e.problems() {
                eprintln!("  {} {}", style("•").red(), problem);
            }
        } else {
            eprintln!("{} {}", style("Error:").red().bold(), e);
        }
    } else {
        eprintln!("{} {}", style("Error:").red().bold(), e);
    }

    if let Some(hint) = e.hint() {
        eprintln!("{} {}", style("Hint:").yellow(), hint);
    }
}

fn init_logging(verbose: u8, config: &Config) {
    // 0 = warn, 1 = info, 2+ = debug
    let level = match verbose {
        0 if config.general.verbose => "info",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::new(format!("stratum={}", level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run() -> StratumResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    // Init replaces the file, so it must work even when the current one is broken
    let config = if matches!(cli.command, Commands::Config(ConfigArgs { action: Some(ConfigAction::Init { .. }) })) {
        Config::default()
    } else {
        config_manager.load().await?
    };

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Validate(args) => stratum::cli::commands::validate(args).await,
        Commands::Plan(args) => stratum::cli::commands::plan(args, &config).await,
        Commands::Caches(args) => stratum::cli::commands::caches(args, &config).await,
        Commands::Config(args) => stratum::cli::commands::config(args, &config_manager, &config).await,
    }
}
