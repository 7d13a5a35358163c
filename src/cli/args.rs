//! CLI argument definitions using clap derive

use crate::generate::GeneratorFlavor;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stratum - build-graph composition engine
///
/// Turns a spec's sources, generators and caches into a build graph for an
/// external build engine.
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a spec and report every problem found
    Validate(ValidateArgs),

    /// Build the dependency graphs for a spec and print them
    Plan(PlanArgs),

    /// Show the cache mounts a spec declares
    Caches(CachesArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Options shared by commands that build graphs
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Cache key namespace (default: from config)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Target platform, e.g. linux/arm64 (default: from config, then host)
    #[arg(long)]
    pub platform: Option<String>,

    /// Compose states by copying instead of diff/merge
    #[arg(long)]
    pub no_diff_merge: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Spec file
    pub spec: PathBuf,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Spec file
    pub spec: PathBuf,

    #[command(flatten)]
    pub build: BuildArgs,

    /// Image the fetch steps run in
    #[arg(long, default_value = "docker.io/library/debian:bookworm")]
    pub worker: String,

    /// Image holding the git credential helper at /frontend
    #[arg(long)]
    pub credential_helper: Option<String>,

    /// Only run these generator flavors (repeatable)
    #[arg(long)]
    pub flavor: Vec<FlavorArg>,

    /// Output format
    #[arg(short, long, default_value = "json")]
    pub format: PlanFormat,
}

/// Arguments for the caches command
#[derive(Parser, Debug)]
pub struct CachesArgs {
    /// Spec file
    pub spec: PathBuf,

    #[command(flatten)]
    pub build: BuildArgs,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
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

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.namespace)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Generator flavor selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FlavorArg {
    Gomod,
    Cargohome,
    Pip,
    Nodemod,
}

impl From<FlavorArg> for GeneratorFlavor {
    fn from(arg: FlavorArg) -> Self {
        match arg {
            FlavorArg::Gomod => GeneratorFlavor::Gomod,
            FlavorArg::Cargohome => GeneratorFlavor::Cargohome,
            FlavorArg::Pip => GeneratorFlavor::Pip,
            FlavorArg::Nodemod => GeneratorFlavor::Nodemod,
        }
    }
}

/// Output format for the plan command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    /// Full graph definitions
    Json,
    /// One line per dependency state
    Summary,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
