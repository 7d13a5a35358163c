//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{StratumError, StratumResult};
use crate::graph::Platform;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> StratumResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> StratumResult<()> {
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> StratumResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            style("!").yellow().bold(),
            path.display()
        );
        eprintln!("  {}", style("Use --force to overwrite").dim());
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    eprintln!(
        "{} Configuration initialized {}",
        style("✓").green().bold(),
        style(path.display()).dim()
    );

    Ok(())
}

async fn set_value(manager: &ConfigManager, config: &Config, key: &str, value: &str) -> StratumResult<()> {
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    manager.save(&config).await?;
    eprintln!("{} Set {} = {}", style("✓").green().bold(), key, value);

    Ok(())
}

/// Set one dot-separated key on `config`
fn apply(config: &mut Config, key: &str, value: &str) -> StratumResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(StratumError::User(format!(
                    "Invalid log format: {}. Use text or json",
                    value
                )))
            }
        },

        ["compose", "disable_diff_merge"] => config.compose.disable_diff_merge = parse_bool(value)?,

        ["build", "namespace"] => {
            if value.is_empty() {
                return Err(StratumError::User("Namespace must not be empty".to_string()));
            }
            config.build.namespace = value.to_string()
        }
        ["build", "platform"] => {
            config.build.platform = if value.is_empty() {
                None
            } else {
                Some(value.parse::<Platform>()?.to_string())
            }
        }

        _ => {
            return Err(StratumError::User(format!(
                "Unknown config key: {} (valid keys: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

const VALID_KEYS: [&str; 5] = [
    "general.verbose",
    "general.log_format",
    "compose.disable_diff_merge",
    "build.namespace",
    "build.platform",
];

fn parse_bool(value: &str) -> StratumResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(StratumError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}
