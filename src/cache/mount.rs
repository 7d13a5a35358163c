//! Persistent cache mount descriptors
//!
//! Derives cache keys and turns them into mounts on exec steps. A key is
//! namespaced with the build namespace and target platform so that builds
//! for different targets never share one physical cache.

use crate::graph::{add_mount, CacheSharing, MountOpt, Platform, RunOpt, State};
use std::fmt;

/// Root for stratum-managed paths inside build containers
pub const TEMP_DIR: &str = "/tmp/stratum";

/// Windows counterpart of [`TEMP_DIR`]
pub const TEMP_DIR_WINDOWS: &str = "C:\\temp\\stratum";

/// Parse a configured sharing mode. An empty string means shared.
pub fn parse_sharing(s: &str) -> Option<CacheSharing> {
    match s {
        "" | "shared" => Some(CacheSharing::Shared),
        "locked" => Some(CacheSharing::Locked),
        "private" => Some(CacheSharing::Private),
        _ => None,
    }
}

pub const SHARING_VALUES: [&str; 3] = ["shared", "locked", "private"];

/// Pick the platform a cache key is derived from.
///
/// An explicit override wins over the platform of the exec step, which
/// wins over the host platform.
pub fn resolve_platform(explicit: Option<&Platform>, ambient: Option<&Platform>) -> Platform {
    explicit.or(ambient).cloned().unwrap_or_else(Platform::host)
}

/// `<namespace>-<platform>-<key>`
pub fn namespaced_key(namespace: &str, platform: &Platform, key: &str) -> String {
    format!("{}-{}-{}", namespace, platform, key)
}

/// Key for an ecosystem cache: namespaced flavor suffix plus optional scope
pub fn flavor_key(namespace: &str, platform: &Platform, suffix: &str, scope: &str) -> String {
    let key = namespaced_key(namespace, platform, suffix);
    if scope.is_empty() {
        key
    } else {
        format!("{}-{}", key, scope)
    }
}

/// A cache mount request, ready to attach to an exec step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMount {
    /// Mount path inside the build container
    pub target: String,
    /// Effective cache key
    pub key: String,
    pub sharing: CacheSharing,
    /// Whether `key` was derived from namespace and platform
    pub auto_namespaced: bool,
}

impl CacheMount {
    /// A non-namespaced, shared cache at `target`
    pub fn fixed(target: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            key: key.into(),
            sharing: CacheSharing::Shared,
            auto_namespaced: false,
        }
    }

    pub fn to_run_opt(&self) -> RunOpt {
        add_mount(
            self.target.clone(),
            &State::scratch(),
            &[MountOpt::PersistentCache {
                id: self.key.clone(),
                sharing: self.sharing,
            }],
        )
    }
}

impl fmt::Display for CacheMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key: {}, sharing: {})", self.target, self.key, self.sharing)
    }
}
