//! Python package downloads
//!
//! Builds a wheel/sdist cache that a later offline `pip install --no-index
//! --find-links` can consume.

use crate::cache::{CacheDir, FlavorInfo};
use crate::error::StratumResult;
use crate::generate::{patched_state, source_mount, work_dir, GenerateContext, GeneratorFlavor};
use crate::graph::{add_env, args, dir, network, progress_group, with_constraints, ConstraintsOpt, NetMode, State};
use crate::sourcemap::location_for;
use crate::spec::{paths_or_default, GeneratorPip, Spec};
use tracing::debug;

/// Output mount holding the downloaded packages
pub const PIP_CACHE_DIR: &str = "/pip-cache";
/// Persistent pip HTTP cache shared by fetch steps
pub const PIP_HTTP_CACHE_DIR: &str = "/tmp/stratum/pip-http-cache";

const HTTP_CACHE_KEY: &str = "stratum-pip-http-cache";
const DEFAULT_REQUIREMENTS: &str = "requirements.txt";

fn http_cache() -> CacheDir {
    CacheDir {
        key: HTTP_CACHE_KEY.to_string(),
        dest: PIP_HTTP_CACHE_DIR.to_string(),
        ..Default::default()
    }
}

/// The download script for one requirements file
fn download_script(pip: &GeneratorPip) -> String {
    let requirements = if pip.requirements_file.is_empty() {
        DEFAULT_REQUIREMENTS
    } else {
        &pip.requirements_file
    };

    let mut index_flags = String::new();
    if !pip.index_url.is_empty() {
        index_flags.push_str(&format!(" --index-url={}", pip.index_url));
    }
    for url in &pip.extra_index_urls {
        index_flags.push_str(&format!(" --extra-index-url={}", url));
    }

    format!(
        "set -e; mkdir -p {out}; \
         python3 -m pip download --dest={out}{idx} setuptools wheel; \
         python3 -m pip download --no-binary=:all: --dest={out} --requirement={req}{idx}",
        out = PIP_CACHE_DIR,
        idx = index_flags,
        req = requirements,
    )
}

impl Spec {
    /// Downloaded pip packages for every source with a pip generator.
    ///
    /// Returns `None` when no source asks for pip packages.
    pub fn pip_deps(&self, ctx: &GenerateContext<'_>, opts: &[ConstraintsOpt]) -> StratumResult<Option<State>> {
        let flavor = GeneratorFlavor::Pip;
        let names = self.sources_with(|g| flavor.matches(g));
        if names.is_empty() {
            return Ok(None);
        }

        let patched = ctx.patched(self, flavor, &names, opts)?;

        let mut opts = opts.to_vec();
        opts.push(progress_group("Fetch pip dependencies for sources"));

        let mut results = Vec::new();
        for name in &names {
            let src = patched_state(&patched, name)?;
            for gen in &self.sources[name].generate {
                let Some(ref pip) = gen.pip else { continue };
                for path in paths_or_default(&pip.paths) {
                    let cwd = work_dir(name, &gen.subpath, &path);
                    debug!("Fetching pip packages in {}", cwd);

                    let step = ctx
                        .worker
                        .run(&[
                            args(["bash", "-c", download_script(pip).as_str()]),
                            dir(cwd),
                            source_mount(src),
                            network(NetMode::Sandbox),
                            http_cache().to_run_opt(&ctx.namespace, FlavorInfo::default()),
                            add_env("PIP_CACHE_DIR", PIP_HTTP_CACHE_DIR),
                            with_constraints(&opts).into(),
                            location_for(pip.source_map.as_ref(), src).into(),
                        ])
                        .add_mount(PIP_CACHE_DIR, &State::scratch(), &[]);
                    results.push(step);
                }
            }
        }

        Ok(Some(ctx.merge(&State::scratch(), &results, &opts)))
    }
}
