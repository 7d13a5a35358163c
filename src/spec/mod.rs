//! Spec documents
//!
//! A spec names its sources, the patches applied to them, the dependency
//! generators they request and the caches attached to build steps. It is
//! written in TOML and decoded twice: once through serde for the values and
//! once through a [`SourceDocument`] so that generators and caches can point
//! diagnostics at the lines that declared them.

pub mod generator;
pub mod patch;
pub mod source;

pub use generator::{
    paths_or_default, GeneratorCargohome, GeneratorGomod, GeneratorNodeMod, GeneratorPip, GomodGitAuth,
    GomodGitAuthSsh, SourceGenerator,
};
pub use patch::{PatchSpec, SourcePatcher, SpecPatcher};
pub use source::{ContextSource, GitSource, HttpSource, InlineFile, InlineSource, Source};

use crate::cache::CacheConfigSpec;
use crate::error::{StratumError, StratumResult};
use crate::sourcemap::{PathSegment, SourceDocument};
use crate::util::sorted_keys;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Spec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sources: HashMap<String, Source>,
    /// Patches keyed by the source they apply to
    #[serde(default)]
    pub patches: HashMap<String, Vec<PatchSpec>>,
    #[serde(default)]
    pub caches: Vec<CacheConfigSpec>,
}

impl Spec {
    /// Decode a spec and attach source maps to its generators and caches
    pub fn load(filename: &str, contents: &str) -> StratumResult<Self> {
        let mut spec: Spec = toml::from_str(contents).map_err(|e| StratumError::SpecParse {
            path: filename.to_string(),
            reason: e.to_string(),
        })?;

        let doc = SourceDocument::parse(filename, contents)?;
        spec.attach_source_maps(&doc);
        debug!(
            "Loaded spec {:?} with {} source(s) and {} cache(s)",
            spec.name,
            spec.sources.len(),
            spec.caches.len()
        );
        Ok(spec)
    }

    /// Read and decode a spec file
    pub async fn load_file(path: &Path) -> StratumResult<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StratumError::io(format!("reading spec {}", path.display()), e))?;
        Self::load(&path.display().to_string(), &contents)
    }

    fn attach_source_maps(&mut self, doc: &SourceDocument) {
        for (name, src) in self.sources.iter_mut() {
            for (i, gen) in src.generate.iter_mut().enumerate() {
                let at = |flavor: &str| {
                    doc.locate(&[
                        PathSegment::from("sources"),
                        PathSegment::from(name.as_str()),
                        PathSegment::from("generate"),
                        PathSegment::from(i),
                        PathSegment::from(flavor),
                    ])
                };
                if let Some(ref mut g) = gen.gomod {
                    g.source_map = at("gomod");
                }
                if let Some(ref mut g) = gen.cargohome {
                    g.source_map = at("cargohome");
                }
                if let Some(ref mut g) = gen.pip {
                    g.source_map = at("pip");
                }
                if let Some(ref mut g) = gen.nodemod {
                    g.source_map = at("nodemod");
                }
            }
        }

        for (i, cache) in self.caches.iter_mut().enumerate() {
            cache.source_map = doc.locate(&[PathSegment::from("caches"), PathSegment::from(i)]);
        }
    }

    /// Check the whole spec, reporting every problem at once
    pub fn validate(&self) -> StratumResult<()> {
        let mut problems = Vec::new();

        for name in sorted_keys(&self.sources) {
            problems.extend(self.sources[&name].validate(&name));
        }

        for target in sorted_keys(&self.patches) {
            if !self.sources.contains_key(&target) {
                problems.push(format!("patches reference unknown source {:?}", target));
            }
            for p in &self.patches[&target] {
                match self.sources.get(&p.source) {
                    None => problems.push(format!(
                        "patch for {:?} references unknown source {:?}",
                        target, p.source
                    )),
                    Some(src) if src.is_dir() && p.path.is_empty() => problems.push(format!(
                        "patch for {:?}: source {:?} is a directory, path is required",
                        target, p.source
                    )),
                    Some(_) => {}
                }
            }
        }

        for (i, cache) in self.caches.iter().enumerate() {
            if let Err(err) = cache.validate() {
                problems.extend(err.problems().into_iter().map(|p| format!("caches[{}]: {}", i, p)));
            }
        }

        StratumError::check(format!("spec {:?}", self.name), problems)
    }

    /// Sources with at least one generator matching `wanted`
    pub fn sources_with(&self, wanted: impl Fn(&SourceGenerator) -> bool) -> Vec<String> {
        sorted_keys(&self.sources)
            .into_iter()
            .filter(|name| self.sources[name].generate.iter().any(&wanted))
            .collect()
    }
}
