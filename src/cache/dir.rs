//! Generic cache directories

use crate::cache::config::FlavorInfo;
use crate::cache::mount::{namespaced_key, parse_sharing, resolve_platform, CacheMount, SHARING_VALUES};
use crate::graph::{Platform, RunOpt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A user-declared persistent cache directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDir {
    /// Cache key. Defaults to `dest` when empty.
    pub key: String,
    /// Absolute mount path
    pub dest: String,
    /// One of shared, locked or private. Empty means shared.
    pub sharing: String,
    /// Use `key` verbatim instead of prefixing namespace and platform
    pub no_auto_namespace: bool,
}

impl CacheDir {
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.dest.is_empty() {
            problems.push("dest is required".to_string());
        } else if !Path::new(&self.dest).is_absolute() {
            problems.push(format!("dest must be an absolute path: {}", self.dest));
        }

        if parse_sharing(&self.sharing).is_none() {
            problems.push(format!(
                "invalid sharing mode {:?}, valid values: {}",
                self.sharing,
                SHARING_VALUES.join(", ")
            ));
        }

        problems
    }

    /// The cache key actually used for `platform`
    pub fn effective_key(&self, namespace: &str, platform: &Platform) -> String {
        let key = if self.key.is_empty() { &self.dest } else { &self.key };
        if self.no_auto_namespace {
            key.clone()
        } else {
            namespaced_key(namespace, platform, key)
        }
    }

    /// # Panics
    ///
    /// Panics if the sharing mode was not validated.
    pub fn mount(&self, namespace: &str, platform: &Platform) -> CacheMount {
        let sharing = match parse_sharing(&self.sharing) {
            Some(s) => s,
            None => panic!("invalid cache sharing mode {:?} reached mount construction", self.sharing),
        };
        CacheMount {
            target: self.dest.clone(),
            key: self.effective_key(namespace, platform),
            sharing,
            auto_namespaced: !self.no_auto_namespace,
        }
    }

    pub fn to_run_opt(&self, namespace: &str, info: FlavorInfo) -> RunOpt {
        let dir = self.clone();
        let namespace = namespace.to_string();
        RunOpt::new(move |ei| {
            let platform = resolve_platform(info.platform.as_ref(), ei.constraints.platform.as_ref());
            let mount = dir.mount(&namespace, &platform);
            debug!("Attaching cache dir {}", mount);
            mount.to_run_opt().apply(ei);
        })
    }
}
