//! Integration tests for Stratum

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const SPEC: &str = r#"name = "demo"

[sources.app]
context = {}
generate = [{ pip = { requirements_file = "dev.txt" } }]

[sources.patches]
inline = { dir = { "fix.patch" = { contents = "--- a\n+++ b\n" } } }

[[patches.app]]
source = "patches"
path = "fix.patch"

[[caches]]
dir = { key = "ccache", dest = "/root/.ccache", sharing = "locked" }

[[caches]]
gobuild = {}
"#;

    /// Command isolated from any user configuration
    fn stratum(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("stratum");
        cmd.env("STRATUM_CONFIG", dir.path().join("config.toml"));
        cmd
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn arg(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    #[test]
    fn help_lists_commands() {
        let dir = TempDir::new().unwrap();
        stratum(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("plan"))
            .stdout(predicate::str::contains("caches"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        stratum(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stratum"));
    }

    #[test]
    fn validate_accepts_good_spec() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        stratum(&dir)
            .args(["validate", arg(&spec)])
            .assert()
            .success()
            .stdout(predicate::str::contains("is valid (2 source(s), 1 generator(s), 2 cache(s))"));
    }

    #[test]
    fn validate_lists_every_problem() {
        let dir = TempDir::new().unwrap();
        let spec = write(
            &dir,
            "bad.toml",
            "name = \"bad\"\n[sources.a]\n[[patches.a]]\nsource = \"missing\"\n[[caches]]\n",
        );
        stratum(&dir)
            .args(["validate", arg(&spec)])
            .assert()
            .failure()
            .stderr(predicate::str::contains("3 problem(s) found"))
            .stderr(predicate::str::contains("unknown source \"missing\""))
            .stderr(predicate::str::contains("stratum validate"));
    }

    #[test]
    fn validate_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "broken.toml", "[sources.a\n");
        stratum(&dir)
            .args(["validate", arg(&spec)])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse spec"))
            .stderr(predicate::str::contains("broken.toml"));
    }

    #[test]
    fn plan_prints_definitions() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        stratum(&dir)
            .args(["plan", arg(&spec), "--namespace", "jammy", "--platform", "linux/amd64"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"pip\""))
            .stdout(predicate::str::contains("--requirement=dev.txt"))
            .stdout(predicate::str::contains("patch -p1 < /patch"))
            .stdout(predicate::str::contains("Fetch pip dependencies for sources"))
            .stdout(predicate::str::contains("jammy-linux/amd64-stratum-pip-http-cache"));
    }

    #[test]
    fn plan_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        let run = || {
            stratum(&dir)
                .args(["plan", arg(&spec), "--format", "summary"])
                .output()
                .unwrap()
                .stdout
        };
        let first = run();
        assert!(String::from_utf8_lossy(&first).starts_with("pip"));
        assert_eq!(first, run());
    }

    #[test]
    fn plan_flavor_filter() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        stratum(&dir)
            .args(["plan", arg(&spec), "--flavor", "gomod"])
            .assert()
            .success()
            .stdout(predicate::str::diff("{}\n"));
    }

    #[test]
    fn plan_reports_deferred_errors() {
        let dir = TempDir::new().unwrap();
        let spec = write(
            &dir,
            "auth.toml",
            r#"[sources.mod]
git = { url = "https://example.com/mod.git", commit = "abc" }
generate = [{ gomod = { auth = { "example.com" = { token = "GIT_TOKEN" } } } }]
"#,
        );
        stratum(&dir)
            .args(["plan", arg(&spec)])
            .assert()
            .failure()
            .stderr(predicate::str::contains("gomod"))
            .stderr(predicate::str::contains("auth.toml:3"))
            .stderr(predicate::str::contains("could not be built"));
    }

    #[test]
    fn caches_plain_output() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        stratum(&dir)
            .args(["caches", arg(&spec), "--namespace", "noble", "--platform", "linux/arm64", "-f", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "/root/.ccache (key: noble-linux/arm64-ccache, sharing: locked)",
            ))
            .stdout(predicate::str::contains("noble-linux/arm64-stratum-gobuildcache"));
    }

    #[test]
    fn caches_use_configured_namespace() {
        let dir = TempDir::new().unwrap();
        let spec = write(&dir, "spec.toml", SPEC);
        write(
            &dir,
            "config.toml",
            "[build]\nnamespace = \"fromconfig\"\nplatform = \"linux/amd64\"\n",
        );
        stratum(&dir)
            .args(["caches", arg(&spec), "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fromconfig-linux/amd64-ccache"));
    }

    #[test]
    fn config_path_honors_env() {
        let dir = TempDir::new().unwrap();
        stratum(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_set_then_show() {
        let dir = TempDir::new().unwrap();
        stratum(&dir)
            .args(["config", "set", "build.namespace", "jammy"])
            .assert()
            .success();
        stratum(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("namespace = \"jammy\""));
    }

    #[test]
    fn config_set_unknown_key() {
        let dir = TempDir::new().unwrap();
        stratum(&dir)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir, "config.toml", "[build]\nplatform = \"linux\"\n");
        stratum(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn init_force_repairs_broken_config() {
        let dir = TempDir::new().unwrap();
        write(&dir, "config.toml", "not toml [");
        stratum(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("config init --force"));
        stratum(&dir).args(["config", "init", "--force"]).assert().success();
        stratum(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("namespace = \"stratum\""));
    }
}
