//! Rust compilation cache backed by sccache
//!
//! The exec step gets a namespaced sccache directory, a shared cache holding
//! a prebuilt sccache binary, a setup script that puts sccache in place and
//! an install script used when no prebuilt binary is cached.

use crate::cache::config::FlavorInfo;
use crate::cache::mount::{flavor_key, resolve_platform, CacheMount, TEMP_DIR, TEMP_DIR_WINDOWS};
use crate::graph::{add_env, add_mount, with_constraint, ExecInfo, Platform, RunOpt, State};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SCCACHE_VERSION: &str = "v0.10.0";
pub const SCCACHE_DOWNLOAD_URL: &str = "https://github.com/mozilla/sccache/releases/download";
pub const SCCACHE_CACHE_SIZE: &str = "10G";

/// Key of the shared cache holding a prebuilt sccache binary
pub const SCCACHE_BINARY_CACHE_KEY: &str = "stratum-sccache-binary-cache";

const KEY_SUFFIX: &str = "stratum-cargobuildcache";

/// Release archives and their SHA-256 sums
const LINUX_X64: (&str, &str) = (
    "x86_64-unknown-linux-musl",
    "1fbb35e135660d04a2d5e42b59c7874d39b3deb17de56330b25b713ec59f849b",
);
const LINUX_ARM64: (&str, &str) = (
    "aarch64-unknown-linux-musl",
    "d6a1ce4acd02b937cd61bc675a8be029a60f7bc167594c33d75732bbc0a07400",
);
const WINDOWS_X64: (&str, &str) = (
    "x86_64-pc-windows-msvc",
    "0d499d0f73fa575f805df014af6ece49b840195fb7de0c552230899d77186ceb",
);
const WINDOWS_ARM64: (&str, &str) = (
    "aarch64-pc-windows-msvc",
    "5fd6cd6dd474e91c37510719bf27cfe1826f929e40dd383c22a7b96da9a5458d",
);

/// Namespaces whose package repositories do not ship sccache
const NEEDS_PRECOMPILED: &[&str] = &[
    "almalinux8",
    "almalinux9",
    "rockylinux8",
    "rockylinux9",
    "bullseye",
    "bionic",
    "focal",
    "jammy",
];

const WINDOWS_NAMESPACES: &[&str] = &["windowsservercore", "nanoserver", "windows", "windowscross"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CargoBuildCache {
    /// Extra key component to separate otherwise identical caches
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    /// Turn off a cache that would otherwise be injected automatically
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Where sccache pieces live inside the build container
struct Layout {
    cache_dir: String,
    binary: String,
    binary_cache: String,
    script_dir: String,
    install_script: &'static str,
    setup_dir: String,
    setup_script: &'static str,
    script_mode: u32,
}

impl Layout {
    fn for_target(windows: bool) -> Self {
        if windows {
            Self {
                cache_dir: format!("{}\\sccache-cache", TEMP_DIR_WINDOWS),
                binary: format!("{}\\sccache.exe", TEMP_DIR_WINDOWS),
                binary_cache: format!("{}\\sccache-binary-cache", TEMP_DIR_WINDOWS),
                script_dir: format!("{}\\scripts", TEMP_DIR_WINDOWS),
                install_script: "install_sccache.ps1",
                setup_dir: format!("{}\\setup", TEMP_DIR_WINDOWS),
                setup_script: "setup_sccache.ps1",
                script_mode: 0o644,
            }
        } else {
            Self {
                cache_dir: format!("{}/sccache-cache", TEMP_DIR),
                binary: format!("{}/sccache", TEMP_DIR),
                binary_cache: format!("{}/sccache-binary-cache", TEMP_DIR),
                script_dir: format!("{}/scripts", TEMP_DIR),
                install_script: "install_sccache.sh",
                setup_dir: format!("{}/setup", TEMP_DIR),
                setup_script: "setup_sccache.sh",
                script_mode: 0o755,
            }
        }
    }
}

impl CargoBuildCache {
    pub fn is_windows_target(namespace: &str, platform: &Platform) -> bool {
        platform.is_windows() || WINDOWS_NAMESPACES.contains(&namespace)
    }

    pub fn to_run_opt(&self, namespace: &str, info: FlavorInfo) -> RunOpt {
        if self.disabled {
            return RunOpt::noop();
        }

        let scope = self.scope.clone();
        let namespace = namespace.to_string();
        RunOpt::new(move |ei| {
            let platform = resolve_platform(info.platform.as_ref(), ei.constraints.platform.as_ref());
            attach(ei, &namespace, &platform, &scope, &info);
        })
    }
}

fn attach(ei: &mut ExecInfo, namespace: &str, platform: &Platform, scope: &str, info: &FlavorInfo) {
    let windows = CargoBuildCache::is_windows_target(namespace, platform);
    let layout = Layout::for_target(windows);

    let cache = CacheMount {
        auto_namespaced: true,
        ..CacheMount::fixed(layout.cache_dir.clone(), flavor_key(namespace, platform, KEY_SUFFIX, scope))
    };
    debug!("Attaching cargo build cache {}", cache);
    cache.to_run_opt().apply(ei);
    CacheMount::fixed(layout.binary_cache.clone(), SCCACHE_BINARY_CACHE_KEY)
        .to_run_opt()
        .apply(ei);

    add_env("SCCACHE_DIR", layout.cache_dir.clone()).apply(ei);
    add_env("SCCACHE_CACHE_SIZE", SCCACHE_CACHE_SIZE).apply(ei);

    let constraints = [with_constraint(&info.constraints)];
    let setup = State::scratch().mkfile(
        layout.setup_script,
        0o755,
        setup_script(&layout, windows),
        &constraints,
    );
    add_mount(layout.setup_dir.clone(), &setup, &[]).apply(ei);

    let install = State::scratch().mkfile(
        layout.install_script,
        layout.script_mode,
        install_script(namespace, windows),
        &constraints,
    );
    add_mount(layout.script_dir.clone(), &install, &[]).apply(ei);
}

fn setup_script(layout: &Layout, windows: bool) -> String {
    let prebuilt = if windows {
        format!("{}\\sccache.exe", layout.binary_cache)
    } else {
        format!("{}/sccache", layout.binary_cache)
    };

    if windows {
        return format!(
            r#"if (Test-Path "{prebuilt}") {{
    Write-Host "Using cached sccache binary"
    Copy-Item "{prebuilt}" "{binary}" -Force
}} else {{
    & "{scripts}\{install}"
}}
"#,
            prebuilt = prebuilt,
            binary = layout.binary,
            scripts = layout.script_dir,
            install = layout.install_script,
        );
    }

    // No `set -e`: a broken cache must not fail the build.
    format!(
        r#"#!/bin/bash
if [ -f "{prebuilt}" ]; then
    cp "{prebuilt}" "{binary}" && chmod +x "{binary}" || echo "warning: could not use cached sccache"
else
    "{scripts}/{install}" || echo "warning: sccache installation failed"
fi

if [ -x "{binary}" ]; then
    export RUSTC_WRAPPER="{binary}"
else
    echo "warning: building without sccache"
    unset RUSTC_WRAPPER || true
fi
"#,
        prebuilt = prebuilt,
        binary = layout.binary,
        scripts = layout.script_dir,
        install = layout.install_script,
    )
}

/// Script installing sccache for `namespace`
pub fn install_script(namespace: &str, windows: bool) -> String {
    if windows {
        return windows_install_script();
    }

    let binary = format!("{}/sccache", TEMP_DIR);
    let mut script = format!(
        r#"#!/bin/bash
set -euo pipefail

if command -v sccache >/dev/null 2>&1; then
    ln -sf "$(command -v sccache)" "{binary}"
    exit 0
fi

"#
    );

    if NEEDS_PRECOMPILED.contains(&namespace) {
        script.push_str(&format!(
            r#"case "$(uname -m)" in
    x86_64) ARCH="{x64}"; SUM="{x64_sum}" ;;
    aarch64) ARCH="{arm}"; SUM="{arm_sum}" ;;
    *) echo "unsupported architecture: $(uname -m)"; exit 1 ;;
esac

URL="{url}/{version}/sccache-{version}-${{ARCH}}.tar.gz"
curl -fsSL "$URL" -o /tmp/sccache.tar.gz
if command -v sha256sum >/dev/null 2>&1; then
    echo "${{SUM}}  /tmp/sccache.tar.gz" | sha256sum -c -
elif command -v shasum >/dev/null 2>&1; then
    echo "${{SUM}}  /tmp/sccache.tar.gz" | shasum -a 256 -c -
else
    echo "warning: no sha256 tool available, skipping checksum"
fi
tar xz --strip-components=1 -C /tmp -f /tmp/sccache.tar.gz
mv /tmp/sccache "{binary}"
chmod +x "{binary}"
rm -f /tmp/sccache.tar.gz
"#,
            x64 = LINUX_X64.0,
            x64_sum = LINUX_X64.1,
            arm = LINUX_ARM64.0,
            arm_sum = LINUX_ARM64.1,
            url = SCCACHE_DOWNLOAD_URL,
            version = SCCACHE_VERSION,
            binary = binary,
        ));
    } else {
        script.push_str(&format!(
            r#"if command -v apt-get >/dev/null 2>&1; then
    apt-get update && apt-get install -y sccache
elif command -v dnf >/dev/null 2>&1; then
    dnf install -y sccache
elif command -v tdnf >/dev/null 2>&1; then
    tdnf install -y sccache
else
    echo "no supported package manager found"
    exit 1
fi
ln -sf "$(command -v sccache)" "{binary}"
"#
        ));
    }

    script
}

fn windows_install_script() -> String {
    format!(
        r#"$ErrorActionPreference = "Stop"
$target = "{dir}\sccache.exe"
New-Item -Path "{dir}" -ItemType Directory -Force | Out-Null

$existing = Get-Command sccache -ErrorAction SilentlyContinue
if ($existing) {{
    Copy-Item -Path $existing.Source -Destination $target -Force
    exit 0
}}

switch ([System.Runtime.InteropServices.RuntimeInformation]::ProcessArchitecture) {{
    "Arm64" {{ $arch = "{arm}"; $sum = "{arm_sum}" }}
    default {{ $arch = "{x64}"; $sum = "{x64_sum}" }}
}}

$archive = "{dir}\sccache.tar.gz"
try {{
    Invoke-WebRequest -Uri "{url}/{version}/sccache-{version}-$arch.tar.gz" -OutFile $archive -UseBasicParsing
    $hash = (Get-FileHash -Path $archive -Algorithm SHA256).Hash.ToLower()
    if ($hash -ne $sum) {{ throw "checksum mismatch: expected $sum, got $hash" }}
    Push-Location "{dir}"
    tar -xzf "sccache.tar.gz"
    Pop-Location
    $exe = Get-ChildItem -Path "{dir}" -Filter "sccache.exe" -Recurse | Select-Object -First 1
    if (-not $exe) {{ throw "sccache.exe not found in archive" }}
    Move-Item -Path $exe.FullName -Destination $target -Force
}} finally {{
    Remove-Item -Path $archive -Force -ErrorAction SilentlyContinue
}}
"#,
        dir = TEMP_DIR_WINDOWS,
        arm = WINDOWS_ARM64.0,
        arm_sum = WINDOWS_ARM64.1,
        x64 = WINDOWS_X64.0,
        x64_sum = WINDOWS_X64.1,
        url = SCCACHE_DOWNLOAD_URL,
        version = SCCACHE_VERSION,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MountKind;

    fn apply(cache: &CargoBuildCache, namespace: &str, platform: Platform) -> ExecInfo {
        let mut ei = ExecInfo::default();
        ei.constraints.platform = Some(platform);
        cache.to_run_opt(namespace, FlavorInfo::default()).apply(&mut ei);
        ei
    }

    fn cache_ids(ei: &ExecInfo) -> Vec<String> {
        ei.mounts
            .iter()
            .filter_map(|m| match &m.kind {
                MountKind::Cache { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn linux_layout() {
        let ei = apply(&CargoBuildCache::default(), "bookworm", Platform::new("linux", "amd64"));
        assert_eq!(ei.env["SCCACHE_DIR"], "/tmp/stratum/sccache-cache");
        assert_eq!(ei.env["SCCACHE_CACHE_SIZE"], "10G");
        assert_eq!(
            cache_ids(&ei),
            vec![
                "bookworm-linux/amd64-stratum-cargobuildcache".to_string(),
                SCCACHE_BINARY_CACHE_KEY.to_string()
            ]
        );
        assert!(ei.mount_for("/tmp/stratum/setup").is_some());
        assert!(ei.mount_for("/tmp/stratum/scripts").is_some());
    }

    #[test]
    fn windows_layout() {
        let ei = apply(&CargoBuildCache::default(), "windowscross", Platform::new("linux", "amd64"));
        assert_eq!(ei.env["SCCACHE_DIR"], "C:\\temp\\stratum\\sccache-cache");

        let ei = apply(&CargoBuildCache::default(), "ltsc2022", Platform::new("windows", "amd64"));
        assert!(ei.mount_for("C:\\temp\\stratum\\scripts").is_some());
    }

    #[test]
    fn disabled_adds_nothing() {
        let cache = CargoBuildCache {
            scope: String::new(),
            disabled: true,
        };
        let ei = apply(&cache, "bookworm", Platform::new("linux", "amd64"));
        assert!(ei.mounts.is_empty());
        assert!(ei.env.is_empty());
    }

    #[test]
    fn install_script_selection() {
        let precompiled = install_script("jammy", false);
        assert!(precompiled.contains(LINUX_X64.1));
        assert!(precompiled.contains("sha256sum -c"));

        let packaged = install_script("bookworm", false);
        assert!(packaged.contains("apt-get install -y sccache"));
        assert!(!packaged.contains("curl"));

        let windows = install_script("windowscross", true);
        assert!(windows.contains(WINDOWS_ARM64.1));
        assert!(windows.contains("Get-FileHash"));
    }
}
