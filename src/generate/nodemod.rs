//! Node module installs
//!
//! Unlike the other flavors the result is per source: each patched source
//! with its `node_modules` directories installed next to the manifests.
//! Install outputs are composed first and the source itself last, so files
//! from the source win where an install step also wrote them.

use crate::cache::{CacheDir, FlavorInfo};
use crate::error::StratumResult;
use crate::generate::{patched_state, source_mount, GenerateContext, GeneratorFlavor, WORK_DIR};
use crate::graph::{
    add_env, clean_path, dir, ignore_cache, network, progress_group, sh_args, with_constraints, ConstraintsOpt,
    NetMode, State,
};
use crate::sourcemap::location_for;
use crate::spec::{paths_or_default, Spec};
use std::collections::BTreeMap;
use tracing::debug;

/// Output mount, seeded with the patched source; install prefixes mirror
/// the source layout beneath it
pub const INSTALL_BASE: &str = "/work/download";
/// Persistent npm download cache
pub const NPM_CACHE_DIR: &str = "/tmp/stratum/npm-cache";

const NPM_CACHE_KEY: &str = "stratum-npm-cache";

fn npm_cache() -> CacheDir {
    CacheDir {
        key: NPM_CACHE_KEY.to_string(),
        dest: NPM_CACHE_DIR.to_string(),
        sharing: "locked".to_string(),
        ..Default::default()
    }
}

impl Spec {
    /// Each source with a nodemod generator, with its modules installed.
    ///
    /// Installs always run; the registry state is not part of the cache key.
    pub fn nodemod_deps(
        &self,
        ctx: &GenerateContext<'_>,
        opts: &[ConstraintsOpt],
    ) -> StratumResult<Option<BTreeMap<String, State>>> {
        let flavor = GeneratorFlavor::Nodemod;
        let names = self.sources_with(|g| flavor.matches(g));
        if names.is_empty() {
            return Ok(None);
        }

        let patched = ctx.patched(self, flavor, &names, opts)?;

        let mut opts = opts.to_vec();
        opts.push(progress_group("Fetch node module dependencies for sources"));

        let mut out = BTreeMap::new();
        for name in &names {
            let src = patched_state(&patched, name)?;

            let mut results = Vec::new();
            for gen in &self.sources[name].generate {
                let Some(ref nodemod) = gen.nodemod else { continue };
                let base = clean_path(&format!("{}/{}", name, gen.subpath));

                for path in paths_or_default(&nodemod.paths) {
                    let rel = clean_path(&format!("{}/{}", base, path));
                    let prefix = format!("{}{}", INSTALL_BASE, rel);
                    debug!("Installing node modules for {} into {}", rel, prefix);

                    let step = ctx
                        .worker
                        .run(&[
                            sh_args(format!("npm install --prefix {}", prefix)),
                            dir(format!("{}{}", WORK_DIR, rel)),
                            source_mount(src),
                            network(NetMode::Sandbox),
                            npm_cache().to_run_opt(&ctx.namespace, FlavorInfo::default()),
                            add_env("npm_config_cache", NPM_CACHE_DIR),
                            with_constraints(&opts).into(),
                            ignore_cache().into(),
                            location_for(nodemod.source_map.as_ref(), src).into(),
                        ])
                        .add_mount(INSTALL_BASE, src, &[]);
                    results.push(step);
                }
            }

            results.push(src.clone());
            out.insert(name.clone(), ctx.merge(&State::scratch(), &results, &opts));
        }

        Ok(Some(out))
    }
}
