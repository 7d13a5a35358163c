//! Plan command - build dependency graphs for a spec and print them

use crate::cli::args::{PlanArgs, PlanFormat};
use crate::cli::commands::{load_valid_spec, BuildSettings};
use crate::config::Config;
use crate::error::{StratumError, StratumResult};
use crate::generate::{GenerateContext, GeneratorFlavor};
use crate::graph::{platform, Definition, State};
use crate::spec::SpecPatcher;
use console::style;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Image reference as a source state
fn image(reference: &str, settings: &BuildSettings) -> State {
    State::source(
        format!("docker-image://{}", reference),
        BTreeMap::new(),
        &[platform(settings.platform.clone())],
    )
}

/// Graphs keyed by dependency label, plus the labels that failed
#[derive(Debug)]
pub struct Plan {
    pub definitions: BTreeMap<String, Definition>,
    pub failures: Vec<(String, StratumError)>,
}

/// Build every requested dependency graph for the spec in `args`
pub async fn build_plan(args: &PlanArgs, config: &Config) -> StratumResult<Plan> {
    let spec = load_valid_spec(&args.spec).await?;
    let settings = BuildSettings::resolve(&args.build, config)?;

    let flavors: Vec<GeneratorFlavor> = if args.flavor.is_empty() {
        GeneratorFlavor::ALL.to_vec()
    } else {
        args.flavor.iter().map(|f| GeneratorFlavor::from(*f)).collect()
    };
    debug!("Planning flavors {:?} with worker {}", flavors, args.worker);

    let mut ctx = GenerateContext::new(
        &settings.composer,
        &SpecPatcher,
        image(&args.worker, &settings),
        settings.namespace.clone(),
    );
    if let Some(ref helper) = args.credential_helper {
        ctx = ctx.with_credential_helper(image(helper, &settings));
    }

    let deps = spec.generate(&flavors, &ctx, &[platform(settings.platform.clone())]);

    let mut failures: Vec<(String, StratumError)> = Vec::new();
    for (flavor, err) in deps.errors() {
        failures.push((flavor.name().to_string(), StratumError::User(err.to_string())));
    }

    let mut definitions = BTreeMap::new();
    for (label, state) in deps.states() {
        match state.marshal() {
            Ok(def) => {
                definitions.insert(label, def);
            }
            Err(e) => failures.push((label, e)),
        }
    }

    info!(
        "Planned {} graph(s), {} failure(s)",
        definitions.len(),
        failures.len()
    );
    Ok(Plan { definitions, failures })
}

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> StratumResult<()> {
    let plan = build_plan(&args, config).await?;

    match args.format {
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(&plan.definitions)?),
        PlanFormat::Summary => {
            if plan.definitions.is_empty() && plan.failures.is_empty() {
                eprintln!("{}", style("No generators requested").dim());
            }
            for (label, def) in &plan.definitions {
                println!(
                    "{:<20} {}  {} op(s), {} cache(s)",
                    label,
                    def.root.digest,
                    def.ops.len(),
                    def.cache_ids().len()
                );
            }
        }
    }

    for (label, err) in &plan.failures {
        eprintln!("{} {}: {}", style("✗").red().bold(), label, err);
    }

    if plan.failures.is_empty() {
        Ok(())
    } else {
        Err(StratumError::User(format!(
            "{} dependency graph(s) could not be built",
            plan.failures.len()
        )))
    }
}
