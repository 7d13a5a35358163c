//! Persistent cache mounts for build steps
//!
//! Each flavor turns a declared cache into mounts and environment on an
//! exec step. Keys are namespaced by build namespace and target platform so
//! that different targets never share a physical cache.
//!
//! | Flavor | Mount | Environment |
//! |--------|-------|-------------|
//! | dir | user `dest` | none |
//! | gobuild | `/tmp/stratum/gobuild-cache` | `GOCACHE` |
//! | cargobuild | `/tmp/stratum/sccache-cache` | `SCCACHE_DIR`, `SCCACHE_CACHE_SIZE` |
//! | bazel | `/tmp/stratum/bazel-local-cache` | via `/etc/bazel.bazelrc` |
//!
//! The engine enforces the sharing mode; nothing here takes locks.

pub mod bazel;
pub mod cargobuild;
pub mod config;
pub mod dir;
pub mod gobuild;
pub mod mount;

pub use bazel::BazelCache;
pub use cargobuild::CargoBuildCache;
pub use config::{
    with_bazel_cache_constraints, with_cargo_cache_constraints, with_dir_constraints, with_go_cache_constraints,
    CacheConfig, CacheConfigSpec, CacheInfo, CacheOpt, FlavorInfo,
};
pub use dir::CacheDir;
pub use gobuild::GoBuildCache;
pub use mount::{flavor_key, namespaced_key, parse_sharing, resolve_platform, CacheMount};
