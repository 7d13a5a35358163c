//! Go module downloads
//!
//! Modules are first downloaded into a shared proxy cache and then pulled
//! from that cache into the step output, so repeated builds only fetch what
//! changed while the output holds exactly the modules this source needs.

use crate::cache::CacheMount;
use crate::error::StratumResult;
use crate::generate::{patched_state, source_mount, work_dir, GenerateContext, GeneratorFlavor};
use crate::graph::{
    add_env, add_mount, add_secret, add_ssh_socket, dir, network, progress_group, sh_args, with_constraints,
    with_run_options, ConstraintsOpt, MountOpt, NetMode, RunOpt, State,
};
use crate::sourcemap::{location_for, merge_locations};
use crate::spec::{paths_or_default, GeneratorGomod, Spec};
use crate::util::sorted_keys;
use tracing::debug;

/// Output mount holding the module cache
pub const GOMOD_CACHE_DIR: &str = "/go/pkg/mod";
/// Key of the shared module proxy cache
pub const GOMOD_PROXY_CACHE_KEY: &str = "stratum-gomod-proxy-cache";
pub const GOMOD_PROXY_CACHE_DIR: &str = "/tmp/stratum/gomod-proxy-cache";

const SCRIPT_DIR: &str = "/tmp/stratum/internal/gomod";
const SCRIPT_NAME: &str = "go_mod_download.sh";
const SECRETS_DIR: &str = "/run/secrets";
const CREDENTIAL_HELPER: &str = "/usr/local/bin/frontend";
const GIT_SSH_COMMAND: &str = "ssh -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no";

/// Auth kinds that go through the credential helper
fn helper_kind(g: &GeneratorGomod, host: &str) -> Option<&'static str> {
    let auth = g.auth.get(host)?;
    if !auth.token.is_empty() {
        Some("token")
    } else if !auth.header.is_empty() {
        Some("header")
    } else {
        None
    }
}

/// Wrapper that configures git auth and downloads modules for the cwd
fn download_script(g: &GeneratorGomod) -> String {
    let hosts = sorted_keys(&g.auth);
    let mut script = String::new();
    if !hosts.is_empty() {
        script.push_str("set -eu\n\n");
    }

    let mut private = Vec::new();
    for host in &hosts {
        let bare = host.split(':').next().unwrap_or(host);
        private.push(bare.to_string());
        script.push('\n');

        if let Some(ref ssh) = g.auth[host].ssh {
            let user = if ssh.username.is_empty() { "git" } else { &ssh.username };
            script.push_str(&format!(
                "git config --global url.\"ssh://{}@{}/\".insteadOf https://{}/\n",
                user, host, bare
            ));
            continue;
        }

        if let Some(kind) = helper_kind(g, host) {
            script.push_str(&format!(
                "git config --global credential.\"https://{}.helper\" \"{} credential-helper --kind={}\"\n",
                host, CREDENTIAL_HELPER, kind
            ));
        }
    }

    script.push_str(&format!("go env -w GOPRIVATE={}\n", private.join(",")));
    script.push_str("[ -f go.mod ]; go mod download\n");
    script
}

/// Secrets and SSH sockets requested by the auth configuration
fn secrets_and_sockets(g: &GeneratorGomod) -> RunOpt {
    let mut opts = Vec::new();
    for host in sorted_keys(&g.auth) {
        let auth = &g.auth[&host];
        if !auth.token.is_empty() {
            opts.push(add_secret(format!("{}/{}/token", SECRETS_DIR, host), auth.token.clone()));
        } else if !auth.header.is_empty() {
            opts.push(add_secret(format!("{}/{}/header", SECRETS_DIR, host), auth.header.clone()));
        } else if let Some(ref ssh) = auth.ssh {
            let sock = format!("/run/stratum/ssh/{}.sock", ssh.id);
            opts.push(add_ssh_socket(sock.clone(), ssh.id.clone(), false));
            opts.push(add_env("SSH_AUTH_SOCK", sock));
            opts.push(add_env("GIT_SSH_COMMAND", GIT_SSH_COMMAND));
        }
    }
    with_run_options(&opts)
}

/// Hosts that need the credential helper
fn helper_hosts(g: &GeneratorGomod) -> Vec<String> {
    sorted_keys(&g.auth)
        .into_iter()
        .filter(|h| helper_kind(g, h).is_some())
        .collect()
}

impl Spec {
    /// The module cache for every source with a gomod generator.
    ///
    /// Token or header auth needs a credential helper on the context. Without
    /// one the source gets a single failing step, evaluated lazily, that
    /// points at every generator that asked for it.
    pub fn gomod_deps(&self, ctx: &GenerateContext<'_>, opts: &[ConstraintsOpt]) -> StratumResult<Option<State>> {
        let flavor = GeneratorFlavor::Gomod;
        let names = self.sources_with(|g| flavor.matches(g));
        if names.is_empty() {
            return Ok(None);
        }

        let patched = ctx.patched(self, flavor, &names, opts)?;
        let proxy_cache = CacheMount::fixed(GOMOD_PROXY_CACHE_DIR, GOMOD_PROXY_CACHE_KEY);
        let script_path = format!("{}/{}", SCRIPT_DIR, SCRIPT_NAME);

        let mut results = Vec::new();
        for name in &names {
            let src = patched_state(&patched, name)?;

            let mut step_opts = opts.to_vec();
            step_opts.push(progress_group(format!("Fetch go module dependencies for source: {}", name)));

            let mut unauthenticated_hosts = Vec::new();
            let mut unauthenticated_at = Vec::new();

            for gen in &self.sources[name].generate {
                let Some(ref gomod) = gen.gomod else { continue };
                let location = location_for(gomod.source_map.as_ref(), src);

                let needs_helper = helper_hosts(gomod);
                let credential_helper = match &ctx.credential_helper {
                    Some(helper) => add_mount(
                        CREDENTIAL_HELPER,
                        helper,
                        &[MountOpt::Readonly, MountOpt::SourcePath("frontend".to_string())],
                    ),
                    None if needs_helper.is_empty() => RunOpt::noop(),
                    None => {
                        unauthenticated_hosts.extend(needs_helper.iter().map(|h| format!("{:?}", h)));
                        unauthenticated_at.push(location);
                        continue;
                    }
                };

                let script = State::scratch().mkfile(SCRIPT_NAME, 0o755, download_script(gomod), &step_opts);

                for path in paths_or_default(&gomod.paths) {
                    let cwd = work_dir(name, &gen.subpath, &path);
                    debug!("Fetching go modules in {}", cwd);

                    let step = ctx
                        .worker
                        .run(&[
                            sh_args(format!(
                                "set -e; GOMODCACHE=\"${{TMP_GOMODCACHE}}\" {script}; GOPROXY=\"file://${{TMP_GOMODCACHE}}/cache/download\" {script}",
                                script = script_path
                            )),
                            secrets_and_sockets(gomod),
                            add_mount(SCRIPT_DIR, &script, &[MountOpt::Readonly]),
                            add_env("GOPATH", "/go"),
                            credential_helper.clone(),
                            add_env("TMP_GOMODCACHE", GOMOD_PROXY_CACHE_DIR),
                            add_env("GIT_SSH_COMMAND", GIT_SSH_COMMAND),
                            dir(cwd),
                            source_mount(src),
                            proxy_cache.to_run_opt(),
                            network(NetMode::Sandbox),
                            with_constraints(&step_opts).into(),
                            location.clone().into(),
                        ])
                        .add_mount(GOMOD_CACHE_DIR, &State::scratch(), &[]);
                    results.push(step);
                }
            }

            if !unauthenticated_at.is_empty() {
                let mut err_opts = step_opts.clone();
                err_opts.push(merge_locations(&unauthenticated_at));
                results.push(State::errored(
                    format!(
                        "git credential helper is required for authenticated module host(s) {}",
                        unauthenticated_hosts.join(", ")
                    ),
                    &err_opts,
                ));
            }
        }

        Ok(Some(ctx.merge(&State::scratch(), &results, opts)))
    }
}
