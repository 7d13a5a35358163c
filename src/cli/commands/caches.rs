//! Caches command - show the cache mounts a spec declares

use crate::cli::args::{CachesArgs, OutputFormat};
use crate::cli::commands::{load_valid_spec, BuildSettings};
use crate::config::Config;
use crate::error::StratumResult;
use crate::graph::{CacheSharing, MountKind, State};
use crate::spec::Spec;
use console::style;
use serde::Serialize;

/// One resolved cache mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheRow {
    /// Position of the cache in the spec
    pub index: usize,
    pub flavor: &'static str,
    pub target: String,
    pub key: String,
    pub sharing: CacheSharing,
}

/// Resolve every cache in `spec` against an exec step on `base`
pub fn resolve_caches(spec: &Spec, base: &State, namespace: &str) -> StratumResult<Vec<CacheRow>> {
    let mut rows = Vec::new();

    for (index, cache) in spec.caches.iter().enumerate() {
        let config = cache.to_config()?;
        let exec = base.run(&[config.to_run_opt(base, namespace, &[])]);

        for mount in &exec.info().mounts {
            if let MountKind::Cache { ref id, sharing } = mount.kind {
                rows.push(CacheRow {
                    index,
                    flavor: config.flavor(),
                    target: mount.target.clone(),
                    key: id.clone(),
                    sharing,
                });
            }
        }
    }

    Ok(rows)
}

/// Execute the caches command
pub async fn execute(args: CachesArgs, config: &Config) -> StratumResult<()> {
    let spec = load_valid_spec(&args.spec).await?;
    let settings = BuildSettings::resolve(&args.build, config)?;

    let base = match settings.platform {
        Some(p) => State::scratch().with_platform(p),
        None => State::scratch(),
    };
    let rows = resolve_caches(&spec, &base, &settings.namespace)?;

    match args.format {
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{} (key: {}, sharing: {})", row.target, row.key, row.sharing);
            }
        }
    }

    Ok(())
}

fn print_table(rows: &[CacheRow]) {
    if rows.is_empty() {
        println!("No caches declared.");
        return;
    }

    println!("{:<4} {:<11} {:<36} {:<8} KEY", "#", "FLAVOR", "TARGET", "SHARING");
    println!("{}", "-".repeat(100));

    for row in rows {
        let sharing = match row.sharing {
            CacheSharing::Shared => style("shared").green().to_string(),
            CacheSharing::Locked => style("locked").yellow().to_string(),
            CacheSharing::Private => style("private").dim().to_string(),
        };
        println!(
            "{:<4} {:<11} {:<36} {:<8} {}",
            row.index, row.flavor, row.target, sharing, row.key
        );
    }

    println!();
    println!("Total: {} mount(s)", rows.len());
}
