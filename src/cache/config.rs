//! Cache configuration
//!
//! A spec declares caches as a one-of table: exactly one of `dir`,
//! `gobuild`, `cargobuild` or `bazel` must be set. [`CacheConfigSpec`] is
//! the raw decoded form; [`CacheConfig`] is the validated variant.

use crate::cache::bazel::BazelCache;
use crate::cache::cargobuild::CargoBuildCache;
use crate::cache::dir::CacheDir;
use crate::cache::gobuild::GoBuildCache;
use crate::error::{StratumError, StratumResult};
use crate::graph::{Constraints, ConstraintsOpt, Platform, RunOpt, State};
use crate::sourcemap::SourceMap;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Per-flavor overrides supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct FlavorInfo {
    /// Explicit platform for the cache key
    pub platform: Option<Platform>,
    /// Constraints for helper steps the flavor builds
    pub constraints: Constraints,
}

impl FlavorInfo {
    fn from_opts(opts: &[ConstraintsOpt]) -> Self {
        let constraints = Constraints::default().with_opts(opts);
        Self {
            platform: constraints.platform.clone(),
            constraints,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    pub dir: FlavorInfo,
    pub gobuild: FlavorInfo,
    pub cargobuild: FlavorInfo,
    pub bazel: FlavorInfo,
}

/// A single mutation of [`CacheInfo`]
#[derive(Clone)]
pub struct CacheOpt(Arc<dyn Fn(&mut CacheInfo) + Send + Sync>);

impl CacheOpt {
    pub fn new(f: impl Fn(&mut CacheInfo) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, info: &mut CacheInfo) {
        (self.0)(info)
    }
}

impl fmt::Debug for CacheOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheOpt(..)")
    }
}

pub fn with_dir_constraints(opts: &[ConstraintsOpt]) -> CacheOpt {
    let info = FlavorInfo::from_opts(opts);
    CacheOpt::new(move |ci| ci.dir = info.clone())
}

pub fn with_go_cache_constraints(opts: &[ConstraintsOpt]) -> CacheOpt {
    let info = FlavorInfo::from_opts(opts);
    CacheOpt::new(move |ci| ci.gobuild = info.clone())
}

pub fn with_cargo_cache_constraints(opts: &[ConstraintsOpt]) -> CacheOpt {
    let info = FlavorInfo::from_opts(opts);
    CacheOpt::new(move |ci| ci.cargobuild = info.clone())
}

pub fn with_bazel_cache_constraints(opts: &[ConstraintsOpt]) -> CacheOpt {
    let info = FlavorInfo::from_opts(opts);
    CacheOpt::new(move |ci| ci.bazel = info.clone())
}

fn collect(opts: &[CacheOpt]) -> CacheInfo {
    let mut info = CacheInfo::default();
    for opt in opts {
        opt.apply(&mut info);
    }
    info
}

/// A cache entry as written in a spec
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfigSpec {
    #[serde(default)]
    pub dir: Option<CacheDir>,
    #[serde(default)]
    pub gobuild: Option<GoBuildCache>,
    #[serde(default)]
    pub cargobuild: Option<CargoBuildCache>,
    #[serde(default)]
    pub bazel: Option<BazelCache>,
    #[serde(skip)]
    pub source_map: Option<SourceMap>,
}

impl CacheConfigSpec {
    fn selected(&self) -> usize {
        [
            self.dir.is_some(),
            self.gobuild.is_some(),
            self.cargobuild.is_some(),
            self.bazel.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Every problem with this entry, or `Ok` if it is usable.
    pub fn validate(&self) -> StratumResult<()> {
        let mut problems = Vec::new();

        if self.selected() != 1 {
            problems.push("exactly one of (dir, gobuild, cargobuild, bazel) must be set".to_string());
        }

        if let Some(ref dir) = self.dir {
            problems.extend(dir.validate().into_iter().map(|p| format!("cache dir: {}", p)));
        }

        StratumError::check("cache config", problems)
    }

    /// Validate and convert into the single selected variant
    pub fn to_config(&self) -> StratumResult<CacheConfig> {
        self.validate()?;

        let config = match (&self.dir, &self.gobuild, &self.cargobuild, &self.bazel) {
            (Some(d), None, None, None) => CacheConfig::Dir(d.clone()),
            (None, Some(g), None, None) => CacheConfig::GoBuild(g.clone()),
            (None, None, Some(c), None) => CacheConfig::CargoBuild(c.clone()),
            (None, None, None, Some(b)) => CacheConfig::Bazel(b.clone()),
            _ => return Err(StratumError::Internal("cache config passed validation with no variant".to_string())),
        };
        Ok(config)
    }
}

/// A validated cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfig {
    Dir(CacheDir),
    GoBuild(GoBuildCache),
    CargoBuild(CargoBuildCache),
    Bazel(BazelCache),
}

impl CacheConfig {
    pub fn flavor(&self) -> &'static str {
        match self {
            Self::Dir(_) => "dir",
            Self::GoBuild(_) => "gobuild",
            Self::CargoBuild(_) => "cargobuild",
            Self::Bazel(_) => "bazel",
        }
    }

    /// Run option attaching this cache to an exec step.
    ///
    /// `worker` runs helper steps some flavors need. `namespace` prefixes
    /// auto-namespaced keys.
    pub fn to_run_opt(&self, worker: &State, namespace: &str, opts: &[CacheOpt]) -> RunOpt {
        let info = collect(opts);
        match self {
            Self::Dir(c) => c.to_run_opt(namespace, info.dir),
            Self::GoBuild(c) => c.to_run_opt(namespace, info.gobuild),
            Self::CargoBuild(c) => c.to_run_opt(namespace, info.cargobuild),
            Self::Bazel(c) => c.to_run_opt(worker, namespace, info.bazel),
        }
    }
}
