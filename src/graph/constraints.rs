//! Operation constraints and the options that build them

use crate::graph::Platform;
use crate::sourcemap::SourceLocation;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Namespace for deterministic progress-group ids
const PROGRESS_GROUP_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2e0b_8a4d_4c3e_9b57_1d2f_3a4b_5c6d);

/// Groups related steps under a single progress label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressGroup {
    pub id: String,
    pub name: String,
}

/// Modifiers attached to a step before it is committed to the graph
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub platform: Option<Platform>,
    pub progress_group: Option<ProgressGroup>,
    pub description: BTreeMap<String, String>,
    pub ignore_cache: bool,
    pub source_locations: Vec<SourceLocation>,
}

impl Constraints {
    /// Build constraints by applying `opts` in order on top of `self`
    pub fn with_opts(mut self, opts: &[ConstraintsOpt]) -> Self {
        for opt in opts {
            opt.apply(&mut self);
        }
        self
    }
}

/// A single mutation of [`Constraints`]
#[derive(Clone)]
pub struct ConstraintsOpt(Arc<dyn Fn(&mut Constraints) + Send + Sync>);

impl ConstraintsOpt {
    pub fn new(f: impl Fn(&mut Constraints) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn apply(&self, c: &mut Constraints) {
        (self.0)(c)
    }
}

impl fmt::Debug for ConstraintsOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConstraintsOpt(..)")
    }
}

/// Combine several options into one that applies them in order
pub fn with_constraints(opts: &[ConstraintsOpt]) -> ConstraintsOpt {
    let opts = opts.to_vec();
    ConstraintsOpt::new(move |c| {
        for opt in &opts {
            opt.apply(c);
        }
    })
}

/// Replace the target constraints wholesale with `constraints`
pub fn with_constraint(constraints: &Constraints) -> ConstraintsOpt {
    let constraints = constraints.clone();
    ConstraintsOpt::new(move |c| *c = constraints.clone())
}

/// Set the platform when one is given. `None` leaves the current value.
pub fn platform(p: Option<Platform>) -> ConstraintsOpt {
    ConstraintsOpt::new(move |c| {
        if let Some(ref p) = p {
            c.platform = Some(p.clone());
        }
    })
}

/// Put the step into the progress group `name`.
///
/// An existing group keeps its id and only takes the new name, so steps
/// that were already grouped stay together.
pub fn progress_group(name: impl Into<String>) -> ConstraintsOpt {
    let name = name.into();
    ConstraintsOpt::new(move |c| {
        let id = match c.progress_group {
            Some(ref existing) => existing.id.clone(),
            None => Uuid::new_v5(&PROGRESS_GROUP_NAMESPACE, name.as_bytes()).to_string(),
        };
        c.progress_group = Some(ProgressGroup {
            id,
            name: name.clone(),
        });
    })
}

pub fn description(key: impl Into<String>, value: impl Into<String>) -> ConstraintsOpt {
    let (key, value) = (key.into(), value.into());
    ConstraintsOpt::new(move |c| {
        c.description.insert(key.clone(), value.clone());
    })
}

/// Display name for the step in build progress
pub fn custom_name(name: impl Into<String>) -> ConstraintsOpt {
    description("llb.customname", name)
}

pub fn ignore_cache() -> ConstraintsOpt {
    ConstraintsOpt::new(|c| c.ignore_cache = true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(opts: &[ConstraintsOpt]) -> Constraints {
        Constraints::default().with_opts(opts)
    }

    #[test]
    fn later_options_override() {
        let c = build(&[
            platform(Some(Platform::new("linux", "amd64"))),
            platform(Some(Platform::new("linux", "arm64"))),
        ]);
        assert_eq!(c.platform, Some(Platform::new("linux", "arm64")));
    }

    #[test]
    fn platform_none_keeps_existing() {
        let c = build(&[platform(Some(Platform::new("linux", "amd64"))), platform(None)]);
        assert_eq!(c.platform, Some(Platform::new("linux", "amd64")));
    }

    #[test]
    fn progress_group_reuses_id() {
        let c = build(&[progress_group("first"), progress_group("second")]);
        let first = build(&[progress_group("first")]);
        let pg = c.progress_group.unwrap();
        assert_eq!(pg.name, "second");
        assert_eq!(pg.id, first.progress_group.unwrap().id);
    }

    #[test]
    fn progress_group_ids_are_deterministic() {
        let a = build(&[progress_group("Fetch pip dependencies for sources")]);
        let b = build(&[progress_group("Fetch pip dependencies for sources")]);
        let c = build(&[progress_group("other")]);
        assert_eq!(a.progress_group, b.progress_group);
        assert_ne!(a.progress_group.unwrap().id, c.progress_group.unwrap().id);
    }

    #[test]
    fn with_constraints_preserves_order() {
        let combined = with_constraints(&[
            description("k", "one"),
            description("k", "two"),
            ignore_cache(),
        ]);
        let c = build(&[combined]);
        assert_eq!(c.description["k"], "two");
        assert!(c.ignore_cache);
    }

    #[test]
    fn with_constraint_replaces_everything() {
        let template = build(&[custom_name("x")]);
        let c = build(&[ignore_cache(), with_constraint(&template)]);
        assert!(!c.ignore_cache);
        assert_eq!(c.description["llb.customname"], "x");
    }
}
