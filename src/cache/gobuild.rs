//! Go incremental build cache

use crate::cache::config::FlavorInfo;
use crate::cache::mount::{flavor_key, resolve_platform, CacheMount};
use crate::graph::{add_env, RunOpt};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const GO_BUILD_CACHE_DIR: &str = "/tmp/stratum/gobuild-cache";
const KEY_SUFFIX: &str = "stratum-gobuildcache";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GoBuildCache {
    /// Extra key component to separate otherwise identical caches
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    /// Turn off a cache that would otherwise be injected automatically
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl GoBuildCache {
    pub fn to_run_opt(&self, namespace: &str, info: FlavorInfo) -> RunOpt {
        if self.disabled {
            return RunOpt::noop();
        }

        let scope = self.scope.clone();
        let namespace = namespace.to_string();
        RunOpt::new(move |ei| {
            let platform = resolve_platform(info.platform.as_ref(), ei.constraints.platform.as_ref());
            let mount = CacheMount {
                auto_namespaced: true,
                ..CacheMount::fixed(GO_BUILD_CACHE_DIR, flavor_key(&namespace, &platform, KEY_SUFFIX, &scope))
            };
            debug!("Attaching go build cache {}", mount);
            mount.to_run_opt().apply(ei);
            add_env("GOCACHE", GO_BUILD_CACHE_DIR).apply(ei);
        })
    }
}
