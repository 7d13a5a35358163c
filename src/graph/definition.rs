//! Serialized build graphs
//!
//! `State::marshal` walks the graph below a state and emits each node once,
//! inputs before consumers, in the order the walk first completes them.
//! The walk visits inputs in declaration order so identical graphs always
//! marshal to identical bytes.

use crate::error::{StratumError, StratumResult};
use crate::graph::constraints::ProgressGroup;
use crate::graph::state::{Op, State};
use crate::graph::Platform;
use crate::sourcemap::Range;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Reference to one output of a marshalled op
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRef {
    pub digest: String,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationEntry {
    pub filename: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    pub ranges: Vec<Range>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_group: Option<ProgressGroup>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub description: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_cache: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_locations: Vec<LocationEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpEntry {
    pub digest: String,
    pub op: Op,
    pub inputs: Vec<OutputRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub metadata: OpMetadata,
}

/// A complete, self-contained build graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Definition {
    pub ops: Vec<OpEntry>,
    pub root: OutputRef,
}

impl Definition {
    pub fn to_json(&self) -> StratumResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn get(&self, digest: &str) -> Option<&OpEntry> {
        self.ops.iter().find(|e| e.digest == digest)
    }

    /// Every persistent cache id mounted anywhere in the graph
    pub fn cache_ids(&self) -> Vec<String> {
        use crate::graph::exec::MountKind;

        let mut ids: Vec<String> = self
            .ops
            .iter()
            .filter_map(|e| match &e.op {
                Op::Exec { mounts, .. } => Some(mounts),
                _ => None,
            })
            .flatten()
            .filter_map(|m| match &m.kind {
                MountKind::Cache { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl State {
    /// Serialize the graph rooted at this state.
    ///
    /// Fails with [`StratumError::Deferred`] when an errored node is
    /// reachable, carrying the source locations recorded on that node.
    pub fn marshal(&self) -> StratumResult<Definition> {
        if let Some(errored) = self.error() {
            let message = match errored.op() {
                Op::Errored { message } => message.clone(),
                other => other.name().to_string(),
            };
            return Err(StratumError::Deferred {
                message,
                locations: errored.constraints().source_locations.clone(),
            });
        }

        let mut ops = Vec::new();
        let mut seen = HashSet::new();
        visit(self, &mut seen, &mut ops);

        Ok(Definition {
            ops,
            root: OutputRef {
                digest: self.digest().to_string(),
                output: self.output(),
            },
        })
    }
}

fn visit(st: &State, seen: &mut HashSet<String>, ops: &mut Vec<OpEntry>) {
    if seen.contains(st.digest()) {
        return;
    }
    for input in st.inputs() {
        visit(input, seen, ops);
    }
    seen.insert(st.digest().to_string());

    let c = st.constraints();
    ops.push(OpEntry {
        digest: st.digest().to_string(),
        op: st.op().clone(),
        inputs: st
            .inputs()
            .iter()
            .map(|i| OutputRef {
                digest: i.digest().to_string(),
                output: i.output(),
            })
            .collect(),
        platform: c.platform.clone(),
        metadata: OpMetadata {
            progress_group: c.progress_group.clone(),
            description: c.description.clone(),
            ignore_cache: c.ignore_cache,
            source_locations: c
                .source_locations
                .iter()
                .map(|loc| LocationEntry {
                    filename: loc.info.filename.clone(),
                    language: loc.info.language.clone(),
                    definition: loc.definition.clone(),
                    ranges: loc.ranges.clone(),
                })
                .collect(),
        },
    });
}
