//! Declared sources and how they become graph states
//!
//! Every source resolves to a state that holds its content under `/<name>`,
//! which is where patch and generator steps expect to find it.

use crate::error::{StratumError, StratumResult};
use crate::graph::{
    exclude_patterns, include_patterns, with_create_dest_path, ConstraintsOpt, CopyOpt, State,
};
use crate::spec::generator::SourceGenerator;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Files from a named local build context
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSource {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitSource {
    pub url: String,
    pub commit: String,
}

/// A single remote file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSource {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineFile {
    #[serde(default)]
    pub contents: String,
    #[serde(default = "default_file_mode")]
    pub permissions: u32,
}

fn default_file_mode() -> u32 {
    0o644
}

/// Content written directly in the spec, either one file or a flat directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineSource {
    #[serde(default)]
    pub file: Option<InlineFile>,
    #[serde(default)]
    pub dir: Option<BTreeMap<String, InlineFile>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    #[serde(default)]
    pub context: Option<ContextSource>,
    #[serde(default)]
    pub git: Option<GitSource>,
    #[serde(default)]
    pub http: Option<HttpSource>,
    #[serde(default)]
    pub inline: Option<InlineSource>,

    /// Sub-directory of the fetched content to keep
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub generate: Vec<SourceGenerator>,
}

impl Source {
    fn variants(&self) -> usize {
        [
            self.context.is_some(),
            self.git.is_some(),
            self.http.is_some(),
            self.inline.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Whether the source is a directory rather than a single file
    pub fn is_dir(&self) -> bool {
        match (&self.http, &self.inline) {
            (Some(_), _) => false,
            (_, Some(inline)) => inline.dir.is_some(),
            _ => true,
        }
    }

    pub fn validate(&self, name: &str) -> Vec<String> {
        let mut problems = Vec::new();

        if self.variants() != 1 {
            problems.push(format!(
                "source {:?}: exactly one of (context, git, http, inline) must be set",
                name
            ));
        }

        if let Some(ref inline) = self.inline {
            let set = usize::from(inline.file.is_some()) + usize::from(inline.dir.is_some());
            if set != 1 {
                problems.push(format!("source {:?}: inline needs exactly one of (file, dir)", name));
            }
            if let Some(ref files) = inline.dir {
                for file in files.keys() {
                    if file.contains('/') {
                        problems.push(format!("source {:?}: inline file name {:?} must not contain '/'", name, file));
                    }
                }
            }
        }

        if !self.is_dir() {
            if !self.path.is_empty() || !self.includes.is_empty() || !self.excludes.is_empty() {
                problems.push(format!(
                    "source {:?}: path, includes and excludes only apply to directory sources",
                    name
                ));
            }
            if !self.generate.is_empty() {
                problems.push(format!("source {:?}: generators require a directory source", name));
            }
        }

        for (i, gen) in self.generate.iter().enumerate() {
            problems.extend(
                gen.validate()
                    .into_iter()
                    .map(|p| format!("source {:?}: generate[{}]: {}", name, i, p)),
            );
        }

        problems
    }

    /// The fetched content before `path`, include and exclude filtering.
    ///
    /// File sources are already placed at `/<name>`.
    fn fetch(&self, name: &str, opts: &[ConstraintsOpt]) -> StratumResult<State> {
        let st = match (&self.context, &self.git, &self.http, &self.inline) {
            (Some(ctx), None, None, None) => {
                let context = if ctx.name.is_empty() { "context" } else { &ctx.name };
                State::local(context, opts)
            }
            (None, Some(git), None, None) => State::git(&git.url, &git.commit, opts),
            (None, None, Some(http), None) => {
                let attrs = BTreeMap::from([("http.filename".to_string(), name.to_string())]);
                State::source(http.url.clone(), attrs, opts)
            }
            (None, None, None, Some(inline)) => inline_state(name, inline, opts)?,
            _ => {
                return Err(StratumError::SourceState {
                    name: name.to_string(),
                    reason: "exactly one source variant must be set".to_string(),
                })
            }
        };
        Ok(st)
    }

    /// The source as a state with its content under `/<name>`
    pub fn as_state(&self, name: &str, opts: &[ConstraintsOpt]) -> StratumResult<State> {
        let fetched = self.fetch(name, opts)?;
        if !self.is_dir() {
            return Ok(fetched);
        }

        let mut copy_opts: Vec<CopyOpt> = vec![with_create_dest_path()];
        if !self.includes.is_empty() {
            copy_opts.push(include_patterns(self.includes.iter().cloned()));
        }
        if !self.excludes.is_empty() {
            copy_opts.push(exclude_patterns(self.excludes.iter().cloned()));
        }

        let src = if self.path.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.path.trim_start_matches('/'))
        };
        Ok(State::scratch().copy(&fetched, src, format!("/{}", name), &copy_opts, opts))
    }
}

fn inline_state(name: &str, inline: &InlineSource, opts: &[ConstraintsOpt]) -> StratumResult<State> {
    match (&inline.file, &inline.dir) {
        (Some(file), None) => Ok(State::scratch().mkfile(
            format!("/{}", name),
            file.permissions,
            file.contents.as_str(),
            opts,
        )),
        (None, Some(files)) => Ok(files.iter().fold(State::scratch(), |st, (file_name, file)| {
            st.mkfile(format!("/{}", file_name), file.permissions, file.contents.as_str(), opts)
        })),
        _ => Err(StratumError::User("inline source needs exactly one of (file, dir)".to_string())),
    }
}
