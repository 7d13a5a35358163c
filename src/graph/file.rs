//! File operations and copy options

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// How a copy treats its source and destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyInfo {
    pub create_dest_path: bool,
    pub allow_not_found: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

/// A single file-level action on a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FileAction {
    Copy {
        /// Index of the source state in the node inputs
        source: usize,
        src: String,
        dest: String,
        info: CopyInfo,
    },
    Mkfile {
        path: String,
        mode: u32,
        data: Vec<u8>,
    },
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
    },
    Rm {
        path: String,
        allow_not_found: bool,
    },
}

/// A single mutation of [`CopyInfo`]
#[derive(Clone)]
pub struct CopyOpt(Arc<dyn Fn(&mut CopyInfo) + Send + Sync>);

impl CopyOpt {
    pub fn new(f: impl Fn(&mut CopyInfo) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, ci: &mut CopyInfo) {
        (self.0)(ci)
    }
}

impl fmt::Debug for CopyOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CopyOpt(..)")
    }
}

pub fn with_create_dest_path() -> CopyOpt {
    CopyOpt::new(|ci| ci.create_dest_path = true)
}

pub fn allow_not_found() -> CopyOpt {
    CopyOpt::new(|ci| ci.allow_not_found = true)
}

/// Add include patterns. Patterns set by earlier options are kept.
pub fn include_patterns<I, S>(patterns: I) -> CopyOpt
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
    CopyOpt::new(move |ci| ci.include_patterns = merge_lists(&ci.include_patterns, &patterns))
}

/// Add exclude patterns. Patterns set by earlier options are kept.
pub fn exclude_patterns<I, S>(patterns: I) -> CopyOpt
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
    CopyOpt::new(move |ci| ci.exclude_patterns = merge_lists(&ci.exclude_patterns, &patterns))
}

/// Combine two pattern lists, prior entries first.
///
/// An empty `new` list leaves `prior` unchanged rather than clearing it.
pub fn merge_lists(prior: &[String], new: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(prior.len() + new.len());
    merged.extend_from_slice(prior);
    merged.extend_from_slice(new);
    merged
}
