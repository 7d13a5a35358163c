//! State composition
//!
//! Overlays a list of states onto a base state at a destination path. The
//! default strategy diffs each addition against the base and merges all of
//! the diffs in one pass, which keeps unchanged bytes out of new layers. The
//! copy strategy exists for backends that cannot apply diff or merge ops.

use crate::config::Config;
use crate::graph::{with_create_dest_path, ConstraintsOpt, State};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How additions are layered onto a base state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeStrategy {
    #[default]
    DiffMerge,
    Copy,
}

impl ComposeStrategy {
    pub fn from_disable_flag(disable_diff_merge: bool) -> Self {
        if disable_diff_merge {
            Self::Copy
        } else {
            Self::DiffMerge
        }
    }
}

/// Layers states onto a base with a fixed strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Composer {
    strategy: ComposeStrategy,
}

impl Composer {
    pub fn new(strategy: ComposeStrategy) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ComposeStrategy::from_disable_flag(config.compose.disable_diff_merge))
    }

    pub fn strategy(&self) -> ComposeStrategy {
        self.strategy
    }

    /// Overlay `additions` onto `base` under `dest`, in order.
    ///
    /// Later additions win where paths overlap. An empty `additions` list
    /// returns `base` itself.
    pub fn merge_at_path(&self, base: &State, additions: &[State], dest: &str, opts: &[ConstraintsOpt]) -> State {
        if additions.is_empty() {
            return base.clone();
        }

        debug!(
            "Composing {} state(s) at {:?} using {:?}",
            additions.len(),
            dest,
            self.strategy
        );

        match self.strategy {
            ComposeStrategy::Copy => additions.iter().fold(base.clone(), |acc, st| {
                acc.copy(st, "/", dest, &[with_create_dest_path()], opts)
            }),
            ComposeStrategy::DiffMerge => {
                let mut layers = Vec::with_capacity(additions.len() + 1);
                layers.push(base.clone());

                for src in additions {
                    let wrapped = if is_root(dest) {
                        src.clone()
                    } else {
                        State::scratch().copy(src, "/", dest, &[with_create_dest_path()], opts)
                    };
                    layers.push(State::diff(base, &wrapped, opts));
                }

                State::merge(&layers, opts)
            }
        }
    }
}

fn is_root(dest: &str) -> bool {
    dest.is_empty() || dest == "/"
}
