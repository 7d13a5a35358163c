//! Exec steps: command, environment, network and mounts

use crate::graph::constraints::{Constraints, ConstraintsOpt};
use crate::graph::state::{Node, Op, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Network access granted to an exec step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetMode {
    #[default]
    Sandbox,
    Host,
    None,
}

/// Concurrency policy for a persistent cache mount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSharing {
    /// Concurrent steps may read and write the cache at the same time
    #[default]
    Shared,
    /// Concurrent steps on the same key are serialized
    Locked,
    /// Each step gets a throwaway view; writes are discarded
    Private,
}

impl fmt::Display for CacheSharing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Shared => "shared",
            Self::Locked => "locked",
            Self::Private => "private",
        };
        f.write_str(s)
    }
}

/// What is mounted at a target path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MountKind {
    Layer {
        readonly: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Cache {
        id: String,
        sharing: CacheSharing,
    },
    Secret {
        id: String,
    },
    Ssh {
        id: String,
        optional: bool,
    },
}

/// A mount before the exec step is committed
#[derive(Debug, Clone)]
pub struct Mount {
    pub target: String,
    /// `None` mounts an empty directory
    pub source: Option<State>,
    pub kind: MountKind,
}

/// Options for a single mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOpt {
    Readonly,
    SourcePath(String),
    PersistentCache { id: String, sharing: CacheSharing },
}

/// Accumulated description of an exec step
#[derive(Debug, Clone, Default)]
pub struct ExecInfo {
    pub constraints: Constraints,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: String,
    pub network: NetMode,
    pub mounts: Vec<Mount>,
}

impl ExecInfo {
    pub fn mount_for(&self, target: &str) -> Option<&Mount> {
        self.mounts.iter().rev().find(|m| m.target == target)
    }
}

/// A single mutation of [`ExecInfo`]
#[derive(Clone)]
pub struct RunOpt(Arc<dyn Fn(&mut ExecInfo) + Send + Sync>);

impl RunOpt {
    pub fn new(f: impl Fn(&mut ExecInfo) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn apply(&self, ei: &mut ExecInfo) {
        (self.0)(ei)
    }
}

impl fmt::Debug for RunOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunOpt(..)")
    }
}

impl From<ConstraintsOpt> for RunOpt {
    fn from(opt: ConstraintsOpt) -> Self {
        RunOpt::new(move |ei| opt.apply(&mut ei.constraints))
    }
}

pub fn with_run_options(opts: &[RunOpt]) -> RunOpt {
    let opts = opts.to_vec();
    RunOpt::new(move |ei| {
        for opt in &opts {
            opt.apply(ei);
        }
    })
}

pub fn args<I, S>(args: I) -> RunOpt
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    RunOpt::new(move |ei| ei.args = args.clone())
}

/// Run `cmd` through `/bin/sh -c`
pub fn sh_args(cmd: impl Into<String>) -> RunOpt {
    let cmd = cmd.into();
    args(["/bin/sh".to_string(), "-c".to_string(), cmd])
}

pub fn dir(cwd: impl Into<String>) -> RunOpt {
    let cwd = cwd.into();
    RunOpt::new(move |ei| ei.cwd = cwd.clone())
}

pub fn add_env(key: impl Into<String>, value: impl Into<String>) -> RunOpt {
    let (key, value) = (key.into(), value.into());
    RunOpt::new(move |ei| {
        ei.env.insert(key.clone(), value.clone());
    })
}

pub fn network(mode: NetMode) -> RunOpt {
    RunOpt::new(move |ei| ei.network = mode)
}

/// Mount `source` at `target`
pub fn add_mount(target: impl Into<String>, source: &State, opts: &[MountOpt]) -> RunOpt {
    let mount = build_mount(target.into(), source, opts);
    RunOpt::new(move |ei| ei.mounts.push(mount.clone()))
}

pub fn add_secret(target: impl Into<String>, id: impl Into<String>) -> RunOpt {
    let mount = Mount {
        target: target.into(),
        source: None,
        kind: MountKind::Secret { id: id.into() },
    };
    RunOpt::new(move |ei| ei.mounts.push(mount.clone()))
}

pub fn add_ssh_socket(target: impl Into<String>, id: impl Into<String>, optional: bool) -> RunOpt {
    let mount = Mount {
        target: target.into(),
        source: None,
        kind: MountKind::Ssh {
            id: id.into(),
            optional,
        },
    };
    RunOpt::new(move |ei| ei.mounts.push(mount.clone()))
}

pub(crate) fn build_mount(target: String, source: &State, opts: &[MountOpt]) -> Mount {
    let mut readonly = false;
    let mut selector = None;
    let mut cache = None;

    for opt in opts {
        match opt {
            MountOpt::Readonly => readonly = true,
            MountOpt::SourcePath(p) => selector = Some(p.clone()),
            MountOpt::PersistentCache { id, sharing } => cache = Some((id.clone(), *sharing)),
        }
    }

    let kind = match cache {
        Some((id, sharing)) => MountKind::Cache { id, sharing },
        None => MountKind::Layer { readonly, selector },
    };

    Mount {
        target,
        source: (!source.is_scratch()).then(|| source.clone()),
        kind,
    }
}

/// Plain-data form of a mount inside a committed exec op
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    pub target: String,
    /// Index into the node inputs, `None` for an empty mount
    pub input: Option<usize>,
    /// Output index produced by this mount, for writable layers
    pub output: Option<usize>,
    pub kind: MountKind,
}

/// An exec step that has not been committed yet
#[derive(Debug, Clone)]
pub struct ExecState {
    base: State,
    info: ExecInfo,
}

impl ExecState {
    pub(crate) fn new(base: State, opts: &[RunOpt]) -> Self {
        let mut info = ExecInfo {
            constraints: Constraints {
                platform: base.platform().cloned(),
                ..Default::default()
            },
            cwd: "/".to_string(),
            ..Default::default()
        };
        for opt in opts {
            opt.apply(&mut info);
        }
        Self { base, info }
    }

    pub fn info(&self) -> &ExecInfo {
        &self.info
    }

    /// Commit the step and return its root filesystem
    pub fn root(self) -> State {
        let (node, _) = self.commit();
        State::from_node(node, 0)
    }

    /// Add a writable mount, commit the step and return the mount's output
    pub fn add_mount(mut self, target: impl Into<String>, source: &State, opts: &[MountOpt]) -> State {
        let target = target.into();
        self.info.mounts.push(build_mount(target.clone(), source, opts));
        let (node, outputs) = self.commit();
        match outputs.get(&target) {
            Some(&idx) => State::from_node(node, idx),
            // Read-only and cache mounts produce nothing; hand back the input.
            None => source.clone(),
        }
    }

    fn commit(self) -> (Arc<Node>, BTreeMap<String, usize>) {
        let ExecState { base, info } = self;

        let mut inputs = vec![base];
        let mut mounts = Vec::with_capacity(info.mounts.len());
        let mut outputs = BTreeMap::new();
        let mut next_output = 1;

        for m in info.mounts {
            let input = m.source.map(|s| {
                inputs.push(s);
                inputs.len() - 1
            });
            let output = match m.kind {
                MountKind::Layer { readonly: false, .. } => {
                    let idx = next_output;
                    next_output += 1;
                    outputs.insert(m.target.clone(), idx);
                    Some(idx)
                }
                _ => None,
            };
            mounts.push(MountEntry {
                target: m.target,
                input,
                output,
                kind: m.kind,
            });
        }

        let op = Op::Exec {
            args: info.args,
            env: info.env,
            cwd: info.cwd,
            network: info.network,
            mounts,
        };
        (State::commit(op, inputs, info.constraints), outputs)
    }
}
