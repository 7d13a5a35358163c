//! Cargo registry downloads
//!
//! `cargo fetch` downloads into a persistent cache mount; the registry and
//! git checkouts are then copied into the output so later builds can run
//! offline with `CARGO_HOME` pointed at it.

use crate::cache::{CacheDir, FlavorInfo};
use crate::error::StratumResult;
use crate::generate::{patched_state, source_mount, work_dir, GenerateContext, GeneratorFlavor};
use crate::graph::{add_env, dir, network, progress_group, sh_args, with_constraints, ConstraintsOpt, NetMode, State};
use crate::sourcemap::location_for;
use crate::spec::{paths_or_default, Spec};
use tracing::debug;

/// Output mount holding the fetched cargo home
pub const CARGO_HOME_DIR: &str = "/cargo/registry";
/// `CARGO_HOME` of the fetch step, backed by a cache mount
pub const CARGO_CACHE_DIR: &str = "/tmp/stratum/cargohome-cache";

const CARGO_CACHE_KEY: &str = "stratum-cargohome-cache";

fn cargo_cache() -> CacheDir {
    CacheDir {
        key: CARGO_CACHE_KEY.to_string(),
        dest: CARGO_CACHE_DIR.to_string(),
        sharing: "locked".to_string(),
        ..Default::default()
    }
}

fn fetch_script() -> String {
    format!(
        "set -e; cargo fetch; mkdir -p {out}; \
         for d in registry git; do if [ -d {cache}/$d ]; then cp -a {cache}/$d {out}/; fi; done",
        out = CARGO_HOME_DIR,
        cache = CARGO_CACHE_DIR,
    )
}

impl Spec {
    /// A cargo home with every crate needed by sources with a cargohome generator
    pub fn cargohome_deps(&self, ctx: &GenerateContext<'_>, opts: &[ConstraintsOpt]) -> StratumResult<Option<State>> {
        let flavor = GeneratorFlavor::Cargohome;
        let names = self.sources_with(|g| flavor.matches(g));
        if names.is_empty() {
            return Ok(None);
        }

        let patched = ctx.patched(self, flavor, &names, opts)?;

        let mut results = Vec::new();
        for name in &names {
            let src = patched_state(&patched, name)?;

            let mut step_opts = opts.to_vec();
            step_opts.push(progress_group(format!("Fetch Cargo dependencies for source: {}", name)));

            for gen in &self.sources[name].generate {
                let Some(ref cargo) = gen.cargohome else { continue };
                for path in paths_or_default(&cargo.paths) {
                    let cwd = work_dir(name, &gen.subpath, &path);
                    debug!("Fetching cargo dependencies in {}", cwd);

                    let step = ctx
                        .worker
                        .run(&[
                            sh_args(fetch_script()),
                            add_env("CARGO_HOME", CARGO_CACHE_DIR),
                            dir(cwd),
                            source_mount(src),
                            network(NetMode::Sandbox),
                            cargo_cache().to_run_opt(&ctx.namespace, FlavorInfo::default()),
                            with_constraints(&step_opts).into(),
                            location_for(cargo.source_map.as_ref(), src).into(),
                        ])
                        .add_mount(CARGO_HOME_DIR, &State::scratch(), &[]);
                    results.push(step);
                }
            }
        }

        Ok(Some(ctx.merge(&State::scratch(), &results, opts)))
    }
}
