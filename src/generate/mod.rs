//! Dependency generators
//!
//! Each flavor collects the sources that request it, patches them, runs one
//! fetch-only step per source path on the worker and merges every step's
//! output into a single dependency state.
//!
//! Fetch steps never depend on each other. Each one writes into a fresh
//! output mount, and the results are composed afterwards in sorted source
//! order so the engine is free to run them in parallel.

pub mod cargohome;
pub mod gomod;
pub mod nodemod;
pub mod pip;

use crate::error::{StratumError, StratumResult};
use crate::graph::{add_mount, clean_path, ConstraintsOpt, MountOpt, RunOpt, State};
use crate::layer::Composer;
use crate::spec::{SourceGenerator, SourcePatcher, Spec};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Where the patched source tree is mounted in every fetch step
pub const WORK_DIR: &str = "/work/src";

/// A dependency generator ecosystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeneratorFlavor {
    Gomod,
    Cargohome,
    Pip,
    Nodemod,
}

impl GeneratorFlavor {
    pub const ALL: [GeneratorFlavor; 4] = [Self::Gomod, Self::Cargohome, Self::Pip, Self::Nodemod];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gomod => "gomod",
            Self::Cargohome => "cargohome",
            Self::Pip => "pip",
            Self::Nodemod => "nodemod",
        }
    }

    /// Whether `gen` requests this flavor
    pub fn matches(&self, gen: &SourceGenerator) -> bool {
        match self {
            Self::Gomod => gen.gomod.is_some(),
            Self::Cargohome => gen.cargohome.is_some(),
            Self::Pip => gen.pip.is_some(),
            Self::Nodemod => gen.nodemod.is_some(),
        }
    }
}

impl fmt::Display for GeneratorFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a generator needs besides the spec itself
pub struct GenerateContext<'a> {
    pub composer: &'a Composer,
    pub patcher: &'a dyn SourcePatcher,
    /// Image the fetch tools run in
    pub worker: State,
    /// Prefix for auto-namespaced cache keys
    pub namespace: String,
    /// State holding the git credential helper binary at `/frontend`
    pub credential_helper: Option<State>,
}

impl<'a> GenerateContext<'a> {
    pub fn new(composer: &'a Composer, patcher: &'a dyn SourcePatcher, worker: State, namespace: impl Into<String>) -> Self {
        Self {
            composer,
            patcher,
            worker,
            namespace: namespace.into(),
            credential_helper: None,
        }
    }

    pub fn with_credential_helper(mut self, helper: State) -> Self {
        self.credential_helper = Some(helper);
        self
    }

    /// Patched states for `names`, with failures tagged by flavor
    fn patched(
        &self,
        spec: &Spec,
        flavor: GeneratorFlavor,
        names: &[String],
        opts: &[ConstraintsOpt],
    ) -> StratumResult<HashMap<String, State>> {
        let filter = |name: &str| names.iter().any(|n| n == name);
        self.patcher
            .patched_sources(spec, &self.worker, &filter, opts)
            .map_err(|e| StratumError::PatchedSources {
                flavor: flavor.name().to_string(),
                source: Box::new(e),
            })
    }

    /// Overlay step outputs into one state
    fn merge(&self, base: &State, results: &[State], opts: &[ConstraintsOpt]) -> State {
        self.composer.merge_at_path(base, results, "/", opts)
    }
}

/// Mount the patched source tree read-only at [`WORK_DIR`]
fn source_mount(patched: &State) -> RunOpt {
    add_mount(WORK_DIR, patched, &[MountOpt::Readonly])
}

/// Working directory of a fetch step for one path of one source
fn work_dir(source: &str, subpath: &str, path: &str) -> String {
    clean_path(&format!("{}/{}/{}/{}", WORK_DIR, source, subpath, path))
}

/// Look up a patched source the patcher was asked for
fn patched_state<'m>(patched: &'m HashMap<String, State>, name: &str) -> StratumResult<&'m State> {
    patched
        .get(name)
        .ok_or_else(|| StratumError::Internal(format!("patcher returned no state for source {:?}", name)))
}

/// Outcome of every generator flavor
#[derive(Debug)]
pub struct GeneratedDeps {
    pub gomod: StratumResult<Option<State>>,
    pub cargohome: StratumResult<Option<State>>,
    pub pip: StratumResult<Option<State>>,
    pub nodemod: StratumResult<Option<BTreeMap<String, State>>>,
}

impl GeneratedDeps {
    /// Flavors that failed, in flavor order
    pub fn errors(&self) -> Vec<(GeneratorFlavor, &StratumError)> {
        let mut out = Vec::new();
        if let Err(ref e) = self.gomod {
            out.push((GeneratorFlavor::Gomod, e));
        }
        if let Err(ref e) = self.cargohome {
            out.push((GeneratorFlavor::Cargohome, e));
        }
        if let Err(ref e) = self.pip {
            out.push((GeneratorFlavor::Pip, e));
        }
        if let Err(ref e) = self.nodemod {
            out.push((GeneratorFlavor::Nodemod, e));
        }
        out
    }

    /// Successful non-empty results keyed by a display label.
    ///
    /// Node module states are labelled `nodemod/<source>`.
    pub fn states(&self) -> BTreeMap<String, State> {
        let mut out = BTreeMap::new();
        for (flavor, result) in [
            (GeneratorFlavor::Gomod, &self.gomod),
            (GeneratorFlavor::Cargohome, &self.cargohome),
            (GeneratorFlavor::Pip, &self.pip),
        ] {
            if let Ok(Some(st)) = result {
                out.insert(flavor.name().to_string(), st.clone());
            }
        }
        if let Ok(Some(ref per_source)) = self.nodemod {
            for (name, st) in per_source {
                out.insert(format!("nodemod/{}", name), st.clone());
            }
        }
        out
    }
}

impl Spec {
    /// Whether any source requests `flavor`
    pub fn has_generator(&self, flavor: GeneratorFlavor) -> bool {
        !self.sources_with(|g| flavor.matches(g)).is_empty()
    }

    /// Run every flavor. A failing flavor does not stop the others.
    pub fn generate_all(&self, ctx: &GenerateContext<'_>, opts: &[ConstraintsOpt]) -> GeneratedDeps {
        self.generate(&GeneratorFlavor::ALL, ctx, opts)
    }

    /// Run the selected flavors; the rest report no state.
    pub fn generate(
        &self,
        flavors: &[GeneratorFlavor],
        ctx: &GenerateContext<'_>,
        opts: &[ConstraintsOpt],
    ) -> GeneratedDeps {
        let on = |f: GeneratorFlavor| flavors.contains(&f);
        let deps = GeneratedDeps {
            gomod: if on(GeneratorFlavor::Gomod) { self.gomod_deps(ctx, opts) } else { Ok(None) },
            cargohome: if on(GeneratorFlavor::Cargohome) { self.cargohome_deps(ctx, opts) } else { Ok(None) },
            pip: if on(GeneratorFlavor::Pip) { self.pip_deps(ctx, opts) } else { Ok(None) },
            nodemod: if on(GeneratorFlavor::Nodemod) { self.nodemod_deps(ctx, opts) } else { Ok(None) },
        };
        for (flavor, err) in deps.errors() {
            warn!("{} generator failed: {}", flavor, err);
        }
        debug!("Generated {} dependency state(s)", deps.states().len());
        deps
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for generator tests

    use super::*;
    use crate::graph::Op;
    use crate::spec::SpecPatcher;

    pub const SPEC: &str = r#"name = "demo"

[sources.app]
context = { name = "app" }
generate = [{ pip = { paths = ["."] } }]

[sources.lib]
context = { name = "lib" }
generate = [{ subpath = "crate-a", cargohome = {} }]

[sources.svc]
git = { url = "https://example.com/svc.git", commit = "v2" }
generate = [
  { gomod = { paths = [".", "tools"] } },
  { nodemod = {} },
]

[sources.web]
context = { name = "web" }
generate = [{ subpath = "ui", nodemod = { paths = ["a", "b"] } }, { pip = {} }]
"#;

    pub fn spec() -> Spec {
        Spec::load("spec.toml", SPEC).unwrap()
    }

    pub fn worker() -> State {
        State::source("docker-image://worker:latest", Default::default(), &[])
    }

    /// Patcher that fails for every request
    pub struct FailingPatcher;

    impl SourcePatcher for FailingPatcher {
        fn patched_sources(
            &self,
            _spec: &Spec,
            _worker: &State,
            _filter: &dyn Fn(&str) -> bool,
            _opts: &[ConstraintsOpt],
        ) -> StratumResult<HashMap<String, State>> {
            Err(StratumError::PatchSourceNotFound("missing".to_string()))
        }
    }

    pub fn with_ctx<T>(f: impl FnOnce(&GenerateContext<'_>) -> T) -> T {
        let composer = Composer::default();
        let ctx = GenerateContext::new(&composer, &SpecPatcher, worker(), "jammy");
        f(&ctx)
    }

    /// Exec steps reachable from `state`, in discovery order
    pub fn exec_steps(state: &State) -> Vec<State> {
        let mut out: Vec<State> = Vec::new();
        let mut stack = vec![state.clone()];
        while let Some(st) = stack.pop() {
            if matches!(st.op(), Op::Exec { .. }) && !out.iter().any(|s| s.digest() == st.digest()) {
                out.push(st.clone());
            }
            stack.extend(st.inputs().iter().rev().cloned());
        }
        out
    }

    /// The cwd of an exec step
    pub fn cwd(state: &State) -> &str {
        match state.op() {
            Op::Exec { cwd, .. } => cwd,
            other => panic!("expected exec, got {:?}", other),
        }
    }
}
