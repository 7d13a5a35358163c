//! Local bazel disk cache
//!
//! Bazel reads the system bazelrc, so the cache is configured by mounting a
//! generated `/etc/bazel.bazelrc`. A helper step on the worker appends a
//! remote-cache entry when a bazel cache socket is forwarded into the build.
//! Projects with their own bazelrc may override these settings.

use crate::cache::config::FlavorInfo;
use crate::cache::mount::{flavor_key, resolve_platform, CacheMount, TEMP_DIR};
use crate::graph::{add_mount, add_ssh_socket, sh_args, with_constraint, MountOpt, RunOpt, State};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// SSH id of the optional remote-cache socket
pub const BAZEL_DEFAULT_SOCKET_ID: &str = "bazel-default";

pub const BAZEL_CACHE_DIR: &str = "/tmp/stratum/bazel-local-cache";
pub const BAZEL_SOCKET: &str = "/tmp/stratum/bazel-remote.sock";
pub const SYSTEM_BAZELRC: &str = "/etc/bazel.bazelrc";

const KEY_SUFFIX: &str = "stratum-bazelcache";
const CHECK_SCRIPT_PATH: &str = "/tmp/stratum/internal/bazel/check-socket.sh";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BazelCache {
    /// Extra key component to separate otherwise identical caches
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl BazelCache {
    /// Socket path probed by the helper step, kept per scope
    fn probe_socket(&self) -> String {
        if self.scope.is_empty() {
            BAZEL_SOCKET.to_string()
        } else {
            format!("{}/{}/bazel-remote.sock", TEMP_DIR, self.scope)
        }
    }

    /// The generated bazelrc, with the remote-cache probe applied
    fn bazelrc(&self, worker: &State, info: &FlavorInfo) -> State {
        let constraints = [with_constraint(&info.constraints)];
        let rc = format!(
            "build --disk_cache={dir}\nfetch --disk_cache={dir}\n",
            dir = BAZEL_CACHE_DIR
        );
        let rc_file = State::scratch().mkfile("bazelrc", 0o644, rc, &constraints);

        let probe = self.probe_socket();
        let check = format!(
            "#!/usr/bin/env sh\nif [ -S {probe:?} ]; then\n\techo \"build --remote_cache=unix:{sock}\" >> {rc}/bazelrc\n\techo \"fetch --remote_cache=unix:{sock}\" >> {rc}/bazelrc\nfi\n",
            probe = probe,
            sock = BAZEL_SOCKET,
            rc = format!("{}/bazelrc-dir", TEMP_DIR),
        );
        let check_script = State::scratch().mkfile("script.sh", 0o755, check, &constraints);

        worker
            .run(&[
                add_ssh_socket(probe, BAZEL_DEFAULT_SOCKET_ID, true),
                sh_args(CHECK_SCRIPT_PATH),
                add_mount(
                    CHECK_SCRIPT_PATH,
                    &check_script,
                    &[MountOpt::SourcePath("script.sh".to_string()), MountOpt::Readonly],
                ),
                with_constraint(&info.constraints).into(),
            ])
            .add_mount(format!("{}/bazelrc-dir", TEMP_DIR), &rc_file, &[])
    }

    pub fn to_run_opt(&self, worker: &State, namespace: &str, info: FlavorInfo) -> RunOpt {
        let rc = self.bazelrc(worker, &info);
        let scope = self.scope.clone();
        let namespace = namespace.to_string();

        RunOpt::new(move |ei| {
            let platform = resolve_platform(info.platform.as_ref(), ei.constraints.platform.as_ref());
            let cache = CacheMount {
                auto_namespaced: true,
                ..CacheMount::fixed(BAZEL_CACHE_DIR, flavor_key(&namespace, &platform, KEY_SUFFIX, &scope))
            };
            debug!("Attaching bazel cache {}", cache);

            add_mount(SYSTEM_BAZELRC, &rc, &[MountOpt::SourcePath("bazelrc".to_string())]).apply(ei);
            cache.to_run_opt().apply(ei);
            add_ssh_socket(BAZEL_SOCKET, BAZEL_DEFAULT_SOCKET_ID, true).apply(ei);
        })
    }
}
