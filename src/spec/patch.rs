//! Applying declared patches to sources
//!
//! Patches can change manifests, so generators always resolve dependencies
//! from the patched tree.

use crate::error::{StratumError, StratumResult};
use crate::graph::{add_mount, dir, progress_group, sh_args, with_constraints, ConstraintsOpt, MountOpt, State};
use crate::spec::Spec;
use crate::util::{duplicate_map, sorted_keys};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// One patch applied to a source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSpec {
    /// Source holding the patch file
    pub source: String,
    /// Path of the patch inside a directory source
    #[serde(default)]
    pub path: String,
    /// Leading path components stripped by `patch`
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// Produces patched source states for a subset of a spec's sources
pub trait SourcePatcher {
    /// Patched states for every source `filter` accepts.
    ///
    /// The result may also contain sources referenced by patches.
    fn patched_sources(
        &self,
        spec: &Spec,
        worker: &State,
        filter: &dyn Fn(&str) -> bool,
        opts: &[ConstraintsOpt],
    ) -> StratumResult<HashMap<String, State>>;
}

/// Runs `patch` on the worker for every declared patch
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecPatcher;

impl SpecPatcher {
    fn apply(
        worker: &State,
        name: &str,
        source: &State,
        states: &HashMap<String, State>,
        patches: &[PatchSpec],
        opts: &[ConstraintsOpt],
    ) -> StratumResult<State> {
        let mut current = source.clone();
        for p in patches {
            let patch_state = states
                .get(&p.source)
                .ok_or_else(|| StratumError::PatchSourceNotFound(p.source.clone()))?;

            let sub_path = if p.path.is_empty() {
                p.source.clone()
            } else {
                format!("{}/{}", p.source, p.path.trim_start_matches('/'))
            };

            current = worker
                .run(&[
                    add_mount(
                        "/patch",
                        patch_state,
                        &[MountOpt::Readonly, MountOpt::SourcePath(sub_path)],
                    ),
                    dir(format!("/src/{}", name)),
                    sh_args(format!("patch -p{} < /patch", p.strip)),
                    with_constraints(opts).into(),
                ])
                .add_mount("/src", &current, &[]);
        }
        Ok(current)
    }
}

impl SourcePatcher for SpecPatcher {
    fn patched_sources(
        &self,
        spec: &Spec,
        worker: &State,
        filter: &dyn Fn(&str) -> bool,
        opts: &[ConstraintsOpt],
    ) -> StratumResult<HashMap<String, State>> {
        let mut states = HashMap::new();

        for name in sorted_keys(&spec.sources) {
            if !filter(&name) {
                continue;
            }
            let src = &spec.sources[&name];
            states.insert(name.clone(), src.as_state(&name, opts)?);

            for p in spec.patches.get(&name).into_iter().flatten() {
                let patch_src = spec
                    .sources
                    .get(&p.source)
                    .ok_or_else(|| StratumError::PatchSourceNotFound(p.source.clone()))?;
                states.insert(p.source.clone(), patch_src.as_state(&p.source, opts)?);
            }
        }

        let mut patched = duplicate_map(&states);
        for name in sorted_keys(&states) {
            let Some(patches) = spec.patches.get(&name) else {
                continue;
            };
            debug!("Applying {} patch(es) to source {}", patches.len(), name);

            let mut step_opts = opts.to_vec();
            step_opts.push(progress_group(format!("Patch spec source: {}", name)));
            let st = Self::apply(worker, &name, &states[&name], &states, patches, &step_opts)?;
            patched.insert(name, st);
        }

        Ok(patched)
    }
}
