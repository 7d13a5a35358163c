//! Dependency generators attached to a source

use crate::sourcemap::SourceMap;
use serde::Deserialize;
use std::collections::HashMap;

/// SSH auth for a go module host
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GomodGitAuthSsh {
    /// SSH socket id forwarded into the step
    pub id: String,
    /// Remote user, `git` when empty
    #[serde(default)]
    pub username: String,
}

/// How to authenticate to one git host while downloading modules.
///
/// `token` and `header` name build secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GomodGitAuth {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub ssh: Option<GomodGitAuthSsh>,
}

impl GomodGitAuth {
    fn methods(&self) -> usize {
        usize::from(!self.token.is_empty()) + usize::from(!self.header.is_empty()) + usize::from(self.ssh.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorGomod {
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Auth per git host, optionally with a port
    #[serde(default)]
    pub auth: HashMap<String, GomodGitAuth>,
    #[serde(skip)]
    pub source_map: Option<SourceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorCargohome {
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(skip)]
    pub source_map: Option<SourceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorPip {
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Defaults to `requirements.txt`
    #[serde(default)]
    pub requirements_file: String,
    #[serde(default)]
    pub index_url: String,
    #[serde(default)]
    pub extra_index_urls: Vec<String>,
    #[serde(skip)]
    pub source_map: Option<SourceMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorNodeMod {
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(skip)]
    pub source_map: Option<SourceMap>,
}

/// One generator entry. Exactly one flavor must be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceGenerator {
    /// Directory inside the source the generator runs from
    #[serde(default)]
    pub subpath: String,
    #[serde(default)]
    pub gomod: Option<GeneratorGomod>,
    #[serde(default)]
    pub cargohome: Option<GeneratorCargohome>,
    #[serde(default)]
    pub pip: Option<GeneratorPip>,
    #[serde(default)]
    pub nodemod: Option<GeneratorNodeMod>,
}

impl SourceGenerator {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let set = [
            self.gomod.is_some(),
            self.cargohome.is_some(),
            self.pip.is_some(),
            self.nodemod.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        if set != 1 {
            problems.push("exactly one of (gomod, cargohome, pip, nodemod) must be set".to_string());
        }

        if let Some(ref gomod) = self.gomod {
            for (host, auth) in &gomod.auth {
                if auth.methods() > 1 {
                    problems.push(format!("gomod auth for {:?}: only one of (token, header, ssh) may be set", host));
                }
                if let Some(ref ssh) = auth.ssh {
                    if ssh.id.is_empty() {
                        problems.push(format!("gomod auth for {:?}: ssh id is required", host));
                    }
                }
            }
        }

        problems
    }
}

/// Configured paths, or the generator root when none are given
pub fn paths_or_default(paths: &Option<Vec<String>>) -> Vec<String> {
    match paths {
        Some(p) => p.clone(),
        None => vec![".".to_string()],
    }
}
