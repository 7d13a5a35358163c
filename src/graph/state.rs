//! Immutable build-graph states
//!
//! A [`State`] is a cheap handle onto one output of a graph node. Every
//! operation returns a new node and never touches its inputs, so a state can
//! be shared freely between independent branches of the graph.

use crate::error::StratumError;
use crate::graph::constraints::{Constraints, ConstraintsOpt};
use crate::graph::exec::{ExecState, MountEntry, NetMode, RunOpt};
use crate::graph::file::{CopyInfo, CopyOpt, FileAction};
use crate::graph::Platform;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The operation a node performs. Inputs are referenced by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Op {
    Scratch,
    Source {
        identifier: String,
        attrs: BTreeMap<String, String>,
    },
    Exec {
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: String,
        network: NetMode,
        mounts: Vec<MountEntry>,
    },
    File(FileAction),
    /// Inputs are `[lower, upper]`
    Diff,
    Merge,
    /// Fails whenever the graph is evaluated
    Errored { message: String },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Scratch => "scratch",
            Op::Source { .. } => "source",
            Op::Exec { .. } => "exec",
            Op::File(_) => "file",
            Op::Diff => "diff",
            Op::Merge => "merge",
            Op::Errored { .. } => "errored",
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<State>,
    pub(crate) constraints: Constraints,
    digest: String,
}

#[derive(Serialize)]
struct DigestInput<'a> {
    op: &'a Op,
    inputs: Vec<(&'a str, usize)>,
    platform: Option<&'a Platform>,
    ignore_cache: bool,
}

fn compute_digest(op: &Op, inputs: &[State], constraints: &Constraints) -> String {
    let input = DigestInput {
        op,
        inputs: inputs.iter().map(|s| (s.digest(), s.output)).collect(),
        platform: constraints.platform.as_ref(),
        ignore_cache: constraints.ignore_cache,
    };

    let mut hasher = Sha256::new();
    if let Ok(bytes) = serde_json::to_vec(&input) {
        hasher.update(bytes);
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// One output of a graph node
#[derive(Clone)]
pub struct State {
    node: Arc<Node>,
    output: usize,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("op", &self.node.op.name())
            .field("digest", &self.node.digest)
            .field("output", &self.output)
            .finish()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.output == other.output && self.node.digest == other.node.digest
    }
}

impl Eq for State {}

impl State {
    pub(crate) fn commit(op: Op, inputs: Vec<State>, constraints: Constraints) -> Arc<Node> {
        let digest = compute_digest(&op, &inputs, &constraints);
        Arc::new(Node {
            op,
            inputs,
            constraints,
            digest,
        })
    }

    pub(crate) fn from_node(node: Arc<Node>, output: usize) -> Self {
        Self { node, output }
    }

    fn new(op: Op, inputs: Vec<State>, constraints: Constraints) -> Self {
        Self::from_node(Self::commit(op, inputs, constraints), 0)
    }

    /// Constraints for a new node derived from this state
    fn derive(&self, opts: &[ConstraintsOpt]) -> Constraints {
        Constraints {
            platform: self.platform().cloned(),
            ..Default::default()
        }
        .with_opts(opts)
    }

    /// The empty filesystem
    pub fn scratch() -> Self {
        Self::new(Op::Scratch, Vec::new(), Constraints::default())
    }

    pub fn source(
        identifier: impl Into<String>,
        attrs: BTreeMap<String, String>,
        opts: &[ConstraintsOpt],
    ) -> Self {
        let op = Op::Source {
            identifier: identifier.into(),
            attrs,
        };
        Self::new(op, Vec::new(), Constraints::default().with_opts(opts))
    }

    /// Files from a named local build context
    pub fn local(name: &str, opts: &[ConstraintsOpt]) -> Self {
        Self::source(format!("local://{}", name), BTreeMap::new(), opts)
    }

    pub fn git(url: &str, commit: &str, opts: &[ConstraintsOpt]) -> Self {
        Self::source(format!("git://{}#{}", url, commit), BTreeMap::new(), opts)
    }

    /// A state that fails with `err` whenever the graph is evaluated.
    ///
    /// The source locations carried by `opts` are reported with the error.
    pub fn errored(err: impl fmt::Display, opts: &[ConstraintsOpt]) -> Self {
        let op = Op::Errored {
            message: err.to_string(),
        };
        Self::new(op, Vec::new(), Constraints::default().with_opts(opts))
    }

    pub fn diff(lower: &State, upper: &State, opts: &[ConstraintsOpt]) -> Self {
        let constraints = lower.derive(opts);
        Self::new(Op::Diff, vec![lower.clone(), upper.clone()], constraints)
    }

    /// Layer `states` in order. Later states win at overlapping paths.
    pub fn merge(states: &[State], opts: &[ConstraintsOpt]) -> Self {
        match states {
            [] => Self::scratch(),
            [only] => only.clone(),
            [first, ..] => {
                let constraints = first.derive(opts);
                Self::new(Op::Merge, states.to_vec(), constraints)
            }
        }
    }

    /// Start an exec step on top of this state
    pub fn run(&self, opts: &[RunOpt]) -> ExecState {
        ExecState::new(self.clone(), opts)
    }

    pub fn copy(
        &self,
        source: &State,
        src: impl Into<String>,
        dest: impl Into<String>,
        copy_opts: &[CopyOpt],
        opts: &[ConstraintsOpt],
    ) -> Self {
        let mut info = CopyInfo::default();
        for o in copy_opts {
            o.apply(&mut info);
        }
        let action = FileAction::Copy {
            source: 1,
            src: src.into(),
            dest: dest.into(),
            info,
        };
        let constraints = self.derive(opts);
        Self::new(Op::File(action), vec![self.clone(), source.clone()], constraints)
    }

    pub fn mkfile(
        &self,
        path: impl Into<String>,
        mode: u32,
        data: impl Into<Vec<u8>>,
        opts: &[ConstraintsOpt],
    ) -> Self {
        self.file(
            FileAction::Mkfile {
                path: path.into(),
                mode,
                data: data.into(),
            },
            opts,
        )
    }

    pub fn mkdir(&self, path: impl Into<String>, mode: u32, make_parents: bool, opts: &[ConstraintsOpt]) -> Self {
        self.file(
            FileAction::Mkdir {
                path: path.into(),
                mode,
                make_parents,
            },
            opts,
        )
    }

    pub fn rm(&self, path: impl Into<String>, allow_not_found: bool, opts: &[ConstraintsOpt]) -> Self {
        self.file(
            FileAction::Rm {
                path: path.into(),
                allow_not_found,
            },
            opts,
        )
    }

    fn file(&self, action: FileAction, opts: &[ConstraintsOpt]) -> Self {
        let constraints = self.derive(opts);
        Self::new(Op::File(action), vec![self.clone()], constraints)
    }

    /// Same filesystem, different default platform for derived steps
    pub fn with_platform(&self, platform: Platform) -> Self {
        if self.platform() == Some(&platform) {
            return self.clone();
        }
        let mut constraints = self.node.constraints.clone();
        constraints.platform = Some(platform);
        let node = Self::commit(self.node.op.clone(), self.node.inputs.clone(), constraints);
        Self::from_node(node, self.output)
    }

    /// Apply a state transformation
    pub fn with(self, f: impl FnOnce(State) -> State) -> State {
        f(self)
    }

    pub fn digest(&self) -> &str {
        &self.node.digest
    }

    pub fn output(&self) -> usize {
        self.output
    }

    pub fn op(&self) -> &Op {
        &self.node.op
    }

    pub fn inputs(&self) -> &[State] {
        &self.node.inputs
    }

    pub fn constraints(&self) -> &Constraints {
        &self.node.constraints
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.node.constraints.platform.as_ref()
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self.node.op, Op::Scratch)
    }

    /// First deferred error reachable from this state, if any
    pub fn error(&self) -> Option<State> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(st) = stack.pop() {
            if !seen.insert(st.node.digest.clone()) {
                continue;
            }
            if matches!(st.node.op, Op::Errored { .. }) {
                return Some(st);
            }
            stack.extend(st.node.inputs.iter().rev().cloned());
        }
        None
    }

    /// Whether `ancestor` is this state or appears anywhere in its inputs
    #[cfg(test)]
    pub(crate) fn descends_from(&self, ancestor: &State) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(st) = stack.pop() {
            if st == *ancestor {
                return true;
            }
            if !seen.insert((st.node.digest.clone(), st.output)) {
                continue;
            }
            stack.extend(st.node.inputs.iter().cloned());
        }
        false
    }
}

/// Surface `err` when the graph rooted at `input` is evaluated.
///
/// Returns `input` unchanged when there is no error.
pub fn error_state(input: &State, err: Option<&StratumError>) -> State {
    match err {
        None => input.clone(),
        Some(err) => {
            let constraints = input.derive(&[]);
            State::new(
                Op::Errored {
                    message: err.to_string(),
                },
                vec![input.clone()],
                constraints,
            )
        }
    }
}

/// State transformation form of [`error_state`]
pub fn error_state_option(err: Option<&StratumError>) -> impl Fn(State) -> State {
    let message = err.map(|e| e.to_string());
    move |input| match message {
        None => input,
        Some(ref m) => {
            let constraints = input.derive(&[]);
            State::new(Op::Errored { message: m.clone() }, vec![input], constraints)
        }
    }
}

/// Normalize `path` to an absolute path without `.`, `..` or repeated slashes.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{custom_name, platform, progress_group};

    #[test]
    fn identical_construction_same_digest() {
        let a = State::scratch().mkfile("/a", 0o644, "x", &[]);
        let b = State::scratch().mkfile("/a", 0o644, "x", &[]);
        assert_eq!(a, b);
        assert!(a.digest().starts_with("sha256:"));
    }

    #[test]
    fn metadata_does_not_affect_digest() {
        let a = State::scratch().mkfile("/a", 0o644, "x", &[progress_group("one")]);
        let b = State::scratch().mkfile("/a", 0o644, "x", &[custom_name("two")]);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn platform_affects_digest() {
        let a = State::scratch().mkfile("/a", 0o644, "x", &[platform(Some(Platform::new("linux", "amd64")))]);
        let b = State::scratch().mkfile("/a", 0o644, "x", &[platform(Some(Platform::new("linux", "arm64")))]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn composition_never_mutates_parent() {
        let base = State::scratch().mkdir("/etc", 0o755, false, &[]);
        let before = base.digest().to_string();
        let child = base.mkfile("/etc/x", 0o644, "y", &[]);
        assert_eq!(base.digest(), before);
        assert_ne!(child.digest(), before);
        assert!(child.descends_from(&base));
        assert!(!base.descends_from(&child));
    }

    #[test]
    fn merge_of_one_is_identity() {
        let a = State::scratch().mkfile("/a", 0o644, "x", &[]);
        assert_eq!(State::merge(std::slice::from_ref(&a), &[]), a);
        assert!(State::merge(&[], &[]).is_scratch());
    }

    #[test]
    fn errored_state_is_found() {
        let bad = State::errored("boom", &[]);
        let st = State::merge(&[State::scratch().mkfile("/a", 0o644, "", &[]), bad], &[]);
        let found = st.error().unwrap();
        assert!(matches!(found.op(), Op::Errored { message } if message == "boom"));
    }

    #[test]
    fn error_state_without_error_is_input() {
        let a = State::scratch().mkfile("/a", 0o644, "x", &[]);
        assert_eq!(error_state(&a, None), a);
        let failed = error_state(&a, Some(&StratumError::Internal("nope".into())));
        assert_ne!(failed, a);
        assert!(failed.error().is_some());
    }

    #[test]
    fn error_state_option_applies_via_with() {
        let a = State::scratch();
        let err = StratumError::Internal("x".into());
        let st = a.clone().with(error_state_option(Some(&err)));
        assert!(st.error().is_some());
        assert_eq!(a.clone().with(error_state_option(None)), a);
    }

    #[test]
    fn clean_path_normalizes() {
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("a/b/"), "/a/b");
        assert_eq!(clean_path("/a//./b/../c"), "/a/c");
    }
}
