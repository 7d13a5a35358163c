//! Local realization of pure file graphs
//!
//! Exec steps only run inside the build engine, but graphs made of sources,
//! file actions, diffs and merges can be evaluated in memory. Tests use this
//! to compare the filesystems two graphs would produce.

use crate::error::StratumError;
use crate::graph::file::{CopyInfo, FileAction};
use crate::graph::state::{clean_path, Op, State};
use glob::Pattern;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealizeError {
    #[error("Cannot realize {0} operation locally")]
    Unsupported(&'static str),

    #[error("Path not found in snapshot: {0}")]
    MissingPath(String),

    #[error("No snapshot for source: {0}")]
    UnknownSource(String),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Malformed graph: {0}")]
    Malformed(String),

    #[error(transparent)]
    Graph(#[from] StratumError),
}

pub type RealizeResult<T> = Result<T, RealizeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Dir,
    File { data: Vec<u8>, mode: u32 },
}

/// An in-memory filesystem, optionally carrying deletions when it is a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
    deletions: BTreeSet<String>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, creating parent directories
    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        let path = clean_path(path);
        self.ensure_parents(&path);
        self.entries.insert(
            path,
            Entry::File {
                data: data.into(),
                mode: 0o644,
            },
        );
        self
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(&clean_path(path))
    }

    pub fn read(&self, path: &str) -> Option<&[u8]> {
        match self.get(path) {
            Some(Entry::File { data, .. }) => Some(data),
            _ => None,
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    pub fn deletions(&self) -> &BTreeSet<String> {
        &self.deletions
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn exists(&self, path: &str) -> bool {
        path == "/" || self.entries.contains_key(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || matches!(self.entries.get(path), Some(Entry::Dir))
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut parent = parent_of(path);
        let mut missing = Vec::new();
        while parent != "/" && !self.entries.contains_key(&parent) {
            missing.push(parent.clone());
            parent = parent_of(&parent);
        }
        for dir in missing {
            self.entries.insert(dir, Entry::Dir);
        }
    }

    fn remove_tree(&mut self, path: &str) {
        if path == "/" {
            self.entries.clear();
            return;
        }
        let prefix = format!("{}/", path);
        self.entries.retain(|p, _| p != path && !p.starts_with(&prefix));
    }

    /// Entries at or below `root`, keyed by their path relative to it
    fn subtree(&self, root: &str) -> Vec<(String, &Entry)> {
        let prefix = if root == "/" {
            "/".to_string()
        } else {
            format!("{}/", root)
        };
        self.entries
            .iter()
            .filter_map(|(p, e)| p.strip_prefix(&prefix).map(|rel| (rel.to_string(), e)))
            .collect()
    }

    /// Layer `upper` on top of this snapshot
    fn apply(&mut self, upper: &Snapshot) {
        for path in &upper.deletions {
            self.remove_tree(path);
        }
        for (path, entry) in &upper.entries {
            if let (Entry::File { .. }, Some(Entry::Dir)) = (entry, self.entries.get(path)) {
                self.remove_tree(path);
            }
            self.ensure_parents(path);
            self.entries.insert(path.clone(), entry.clone());
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn join(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_string();
    }
    clean_path(&format!("{}/{}", base, rel))
}

/// Provides the contents of source ops
pub trait SourceResolver {
    fn resolve(&self, identifier: &str) -> RealizeResult<Snapshot>;
}

/// Resolver backed by a fixed identifier → snapshot table
#[derive(Debug, Default, Clone)]
pub struct MapResolver {
    sources: HashMap<String, Snapshot>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, identifier: impl Into<String>, snapshot: Snapshot) -> Self {
        self.sources.insert(identifier.into(), snapshot);
        self
    }
}

impl SourceResolver for MapResolver {
    fn resolve(&self, identifier: &str) -> RealizeResult<Snapshot> {
        self.sources
            .get(identifier)
            .cloned()
            .ok_or_else(|| RealizeError::UnknownSource(identifier.to_string()))
    }
}

/// Evaluate the filesystem of `state`
pub fn realize(state: &State, resolver: &dyn SourceResolver) -> RealizeResult<Snapshot> {
    match state.op() {
        Op::Scratch => Ok(Snapshot::new()),
        Op::Source { identifier, .. } => resolver.resolve(identifier),
        Op::Exec { .. } => Err(RealizeError::Unsupported("exec")),
        Op::Errored { message } => Err(StratumError::Deferred {
            message: message.clone(),
            locations: state.constraints().source_locations.clone(),
        }
        .into()),
        Op::Merge => {
            let mut out = Snapshot::new();
            for input in state.inputs() {
                out.apply(&realize(input, resolver)?);
            }
            out.deletions.clear();
            Ok(out)
        }
        Op::Diff => {
            let [lower, upper] = state.inputs() else {
                return Err(RealizeError::Malformed("diff requires two inputs".to_string()));
            };
            let lower_fs = realize(lower, resolver)?;
            let upper_fs = realize(upper, resolver)?;
            Ok(diff(&lower_fs, &upper_fs, upper.descends_from(lower)))
        }
        Op::File(action) => {
            let base = state
                .inputs()
                .first()
                .map(|s| realize(s, resolver))
                .transpose()?
                .unwrap_or_default();
            apply_file_action(base, action, state.inputs(), resolver)
        }
    }
}

/// Changes between two snapshots.
///
/// Deletions are only recorded when `upper` was built on top of `lower`; an
/// unrelated upper state only contributes what it contains.
fn diff(lower: &Snapshot, upper: &Snapshot, related: bool) -> Snapshot {
    let mut out = Snapshot::new();
    for (path, entry) in &upper.entries {
        if lower.entries.get(path) != Some(entry) {
            out.entries.insert(path.clone(), entry.clone());
        }
    }
    if related {
        for path in lower.entries.keys() {
            if !upper.entries.contains_key(path) {
                out.deletions.insert(path.clone());
            }
        }
    }
    out
}

fn apply_file_action(
    mut fs: Snapshot,
    action: &FileAction,
    inputs: &[State],
    resolver: &dyn SourceResolver,
) -> RealizeResult<Snapshot> {
    match action {
        FileAction::Mkfile { path, mode, data } => {
            let path = clean_path(path);
            require_parent(&fs, &path)?;
            fs.entries.insert(
                path,
                Entry::File {
                    data: data.clone(),
                    mode: *mode,
                },
            );
        }
        FileAction::Mkdir {
            path, make_parents, ..
        } => {
            let path = clean_path(path);
            if *make_parents {
                fs.ensure_parents(&path);
            } else {
                require_parent(&fs, &path)?;
            }
            if path != "/" {
                fs.entries.insert(path, Entry::Dir);
            }
        }
        FileAction::Rm {
            path,
            allow_not_found,
        } => {
            let path = clean_path(path);
            if !fs.exists(&path) && !allow_not_found {
                return Err(RealizeError::MissingPath(path));
            }
            fs.remove_tree(&path);
        }
        FileAction::Copy {
            source,
            src,
            dest,
            info,
        } => {
            let src_state = inputs
                .get(*source)
                .ok_or_else(|| RealizeError::Malformed(format!("copy source input {} missing", source)))?;
            let src_fs = realize(src_state, resolver)?;
            copy(&mut fs, &src_fs, src, dest, info)?;
        }
    }
    Ok(fs)
}

fn require_parent(fs: &Snapshot, path: &str) -> RealizeResult<()> {
    let parent = parent_of(path);
    if fs.is_dir(&parent) {
        Ok(())
    } else {
        Err(RealizeError::MissingPath(parent))
    }
}

fn copy(fs: &mut Snapshot, src_fs: &Snapshot, src: &str, dest: &str, info: &CopyInfo) -> RealizeResult<()> {
    let dest_is_dir_hint = dest.ends_with('/');
    let src = clean_path(src);
    let dest = clean_path(dest);

    let includes = compile(&info.include_patterns)?;
    let excludes = compile(&info.exclude_patterns)?;

    match (src.as_str(), src_fs.entries.get(&src)) {
        ("/", _) | (_, Some(Entry::Dir)) => {
            if info.create_dest_path {
                fs.ensure_parents(&dest);
            } else if dest != "/" && !fs.is_dir(&dest) {
                require_parent(fs, &dest)?;
            }
            if dest != "/" {
                fs.entries.insert(dest.clone(), Entry::Dir);
            }
            for (rel, entry) in src_fs.subtree(&src) {
                if !selected(&rel, &includes, &excludes) {
                    continue;
                }
                let target = join(&dest, &rel);
                fs.ensure_parents(&target);
                if let (Entry::File { .. }, true) = (entry, fs.is_dir(&target)) {
                    fs.remove_tree(&target);
                }
                fs.entries.insert(target, entry.clone());
            }
        }
        (_, Some(entry @ Entry::File { .. })) => {
            let target = if dest_is_dir_hint || fs.is_dir(&dest) {
                let name = src.rsplit('/').next().unwrap_or_default();
                join(&dest, name)
            } else {
                dest
            };
            if info.create_dest_path {
                fs.ensure_parents(&target);
            } else {
                require_parent(fs, &target)?;
            }
            fs.entries.insert(target, entry.clone());
        }
        (_, None) if info.allow_not_found => {}
        (_, None) => return Err(RealizeError::MissingPath(src)),
    }
    Ok(())
}

fn compile(patterns: &[String]) -> RealizeResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p.trim_start_matches('/')).map_err(RealizeError::from))
        .collect()
}

/// Whether a relative path passes the include and exclude filters.
///
/// A pattern matching a directory also selects everything below it.
fn selected(rel: &str, includes: &[Pattern], excludes: &[Pattern]) -> bool {
    let matches = |patterns: &[Pattern]| {
        let mut candidate = rel;
        loop {
            if patterns.iter().any(|p| p.matches(candidate)) {
                return true;
            }
            match candidate.rfind('/') {
                Some(idx) => candidate = &candidate[..idx],
                None => return false,
            }
        }
    };

    if !includes.is_empty() && !matches(includes) {
        return false;
    }
    !matches(excludes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{exclude_patterns, include_patterns, sh_args, with_create_dest_path};

    fn none() -> MapResolver {
        MapResolver::new()
    }

    #[test]
    fn mkfile_requires_parent() {
        let st = State::scratch().mkfile("/a/b", 0o644, "x", &[]);
        assert!(matches!(realize(&st, &none()), Err(RealizeError::MissingPath(p)) if p == "/a"));

        let st = State::scratch()
            .mkdir("/a", 0o755, false, &[])
            .mkfile("/a/b", 0o644, "x", &[]);
        assert_eq!(realize(&st, &none()).unwrap().read("/a/b"), Some(&b"x"[..]));
    }

    #[test]
    fn source_resolves_through_resolver() {
        let resolver = MapResolver::new().insert("local://ctx", Snapshot::new().with_file("/f", "1"));
        let st = State::local("ctx", &[]);
        assert_eq!(realize(&st, &resolver).unwrap().read("/f"), Some(&b"1"[..]));
        assert!(matches!(
            realize(&State::local("other", &[]), &resolver),
            Err(RealizeError::UnknownSource(_))
        ));
    }

    #[test]
    fn exec_is_unsupported() {
        let st = State::scratch().run(&[sh_args("true")]).root();
        assert!(matches!(realize(&st, &none()), Err(RealizeError::Unsupported("exec"))));
    }

    #[test]
    fn copy_dir_contents_with_create_dest_path() {
        let src = State::scratch()
            .mkdir("/pkg", 0o755, false, &[])
            .mkfile("/pkg/a", 0o644, "a", &[])
            .mkfile("/top", 0o644, "t", &[]);
        let st = State::scratch().copy(&src, "/", "/x/y", &[with_create_dest_path()], &[]);
        let fs = realize(&st, &none()).unwrap();
        assert_eq!(fs.read("/x/y/pkg/a"), Some(&b"a"[..]));
        assert_eq!(fs.read("/x/y/top"), Some(&b"t"[..]));
        assert_eq!(fs.get("/x"), Some(&Entry::Dir));
    }

    #[test]
    fn copy_without_dest_parent_fails() {
        let src = State::scratch().mkfile("/a", 0o644, "a", &[]);
        let st = State::scratch().copy(&src, "/a", "/missing/a", &[], &[]);
        assert!(realize(&st, &none()).is_err());
    }

    #[test]
    fn copy_file_into_existing_dir() {
        let src = State::scratch().mkfile("/a", 0o644, "a", &[]);
        let st = State::scratch()
            .mkdir("/d", 0o755, false, &[])
            .copy(&src, "/a", "/d", &[], &[]);
        assert_eq!(realize(&st, &none()).unwrap().read("/d/a"), Some(&b"a"[..]));
    }

    #[test]
    fn copy_filters_patterns() {
        let src = State::scratch()
            .mkdir("/src", 0o755, false, &[])
            .mkfile("/src/main.rs", 0o644, "m", &[])
            .mkfile("/src/tmp.log", 0o644, "l", &[])
            .mkfile("/README", 0o644, "r", &[]);
        let st = State::scratch().copy(
            &src,
            "/",
            "/",
            &[include_patterns(["src"]), exclude_patterns(["*.log"])],
            &[],
        );
        let fs = realize(&st, &none()).unwrap();
        assert!(fs.read("/src/main.rs").is_some());
        assert!(fs.read("/src/tmp.log").is_none());
        assert!(fs.read("/README").is_none());
    }

    #[test]
    fn merge_is_last_wins() {
        let a = State::scratch().mkfile("/f", 0o644, "a", &[]);
        let b = State::scratch().mkfile("/f", 0o644, "b", &[]);
        let fs = realize(&State::merge(&[a, b], &[]), &none()).unwrap();
        assert_eq!(fs.read("/f"), Some(&b"b"[..]));
    }

    #[test]
    fn related_diff_carries_deletions() {
        let base = State::scratch()
            .mkfile("/keep", 0o644, "k", &[])
            .mkfile("/gone", 0o644, "g", &[]);
        let upper = base.rm("/gone", false, &[]).mkfile("/new", 0o644, "n", &[]);
        let d = State::diff(&base, &upper, &[]);

        let fs = realize(&d, &none()).unwrap();
        assert_eq!(fs.paths(), vec!["/new"]);
        assert!(fs.deletions().contains("/gone"));

        let merged = realize(&State::merge(&[base, d], &[]), &none()).unwrap();
        assert_eq!(merged.paths(), vec!["/keep", "/new"]);
    }

    #[test]
    fn unrelated_diff_only_adds() {
        let base = State::scratch().mkfile("/keep", 0o644, "k", &[]);
        let other = State::scratch().mkfile("/new", 0o644, "n", &[]);
        let d = State::diff(&base, &other, &[]);
        let fs = realize(&d, &none()).unwrap();
        assert!(fs.deletions().is_empty());
        assert_eq!(fs.paths(), vec!["/new"]);
    }

    #[test]
    fn rm_missing_path() {
        let st = State::scratch().rm("/nope", false, &[]);
        assert!(realize(&st, &none()).is_err());
        let st = State::scratch().rm("/nope", true, &[]);
        assert!(realize(&st, &none()).unwrap().is_empty());
    }

    #[test]
    fn errored_state_fails_realization() {
        let st = State::errored("bad", &[]);
        assert!(matches!(realize(&st, &none()), Err(RealizeError::Graph(StratumError::Deferred { .. }))));
    }
}
