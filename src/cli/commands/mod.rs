//! CLI command implementations

pub mod caches;
pub mod config;
pub mod plan;
pub mod validate;

pub use caches::execute as caches;
pub use config::execute as config;
pub use plan::execute as plan;
pub use validate::execute as validate;

use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::StratumResult;
use crate::graph::Platform;
use crate::layer::{ComposeStrategy, Composer};
use crate::spec::Spec;
use std::path::Path;
use tracing::debug;

/// Build settings after applying command-line overrides to the config
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub namespace: String,
    pub platform: Option<Platform>,
    pub composer: Composer,
}

impl BuildSettings {
    pub fn resolve(args: &BuildArgs, config: &Config) -> StratumResult<Self> {
        let namespace = args
            .namespace
            .clone()
            .unwrap_or_else(|| config.build.namespace.clone());

        let platform = match args.platform.as_ref().or(config.build.platform.as_ref()) {
            Some(p) => Some(p.parse::<Platform>()?),
            None => None,
        };

        let strategy = ComposeStrategy::from_disable_flag(args.no_diff_merge || config.compose.disable_diff_merge);
        debug!(
            "Build settings: namespace={}, platform={:?}, strategy={:?}",
            namespace, platform, strategy
        );

        Ok(Self {
            namespace,
            platform,
            composer: Composer::new(strategy),
        })
    }
}

/// Load a spec file and reject it unless it is valid
async fn load_valid_spec(path: &Path) -> StratumResult<Spec> {
    let spec = Spec::load_file(path).await?;
    spec.validate()?;
    Ok(spec)
}
