//! Validate command - check a spec without building anything

use crate::cli::args::ValidateArgs;
use crate::error::StratumResult;
use crate::spec::Spec;
use console::style;
use tracing::info;

/// Execute the validate command
pub async fn execute(args: ValidateArgs) -> StratumResult<()> {
    let spec = Spec::load_file(&args.spec).await?;
    spec.validate()?;

    let generators: usize = spec.sources.values().map(|s| s.generate.len()).sum();
    info!("Validated {}", args.spec.display());

    println!(
        "{} {} is valid ({} source(s), {} generator(s), {} cache(s))",
        style("✓").green().bold(),
        args.spec.display(),
        spec.sources.len(),
        generators,
        spec.caches.len()
    );

    Ok(())
}
