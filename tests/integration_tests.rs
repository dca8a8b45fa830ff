// Integration tests for lockweave
//
// End-to-end runs from lock file text to a build plan, plus a few checks of
// the command-line front end.

use std::process::Command;

use lockweave::types::{DistributionKind, OsFamily};
use lockweave::{
    BuildPlan, Entry, LockFile, Overrides, PlanConfig, PlanEntry, PlanError, RegistryBuilder,
    TargetEnvironment,
};
use tempfile::NamedTempFile;

const LOCK: &str = r#"
[[package]]
name = "foo"
version = "1.0"
python-versions = ">=3.8,<4.0"
files = [
    {file = "foo-1.0.tar.gz", hash = "sha256:foo"},
]

[package.dependencies]
bar = "*"
Typing_Extensions = ">=4"
colorama = {version = "*", markers = "sys_platform == \"win32\""}

[[package]]
name = "bar"
version = "2.0"
python-versions = "*"
marker = "os_name == \"nt\""
files = [
    {file = "bar-2.0.tar.gz", hash = "sha256:bar"},
]

[[package]]
name = "typing-extensions"
version = "4.8.0"
python-versions = ">=3.8"
files = [
    {file = "typing_extensions-4.8.0-py3-none-any.whl", hash = "sha256:te"},
]

[[package]]
name = "colorama"
version = "0.4.6"
python-versions = "!=3.0.*,!=3.1.*,!=3.2.*,!=3.3.*,!=3.4.*,!=3.5.*,!=3.6.*,>=2.7"
files = [
    {file = "colorama-0.4.6-py2.py3-none-any.whl", hash = "sha256:col"},
    {file = "colorama-0.4.6.tar.gz", hash = "sha256:col-src"},
]

[[package]]
name = "numpy"
version = "1.26.0"
python-versions = ">=3.9"
files = [
    {file = "numpy-1.26.0-cp311-cp311-manylinux_2_17_x86_64.manylinux2014_x86_64.whl", hash = "sha256:np-linux"},
    {file = "numpy-1.26.0-cp311-cp311-win_amd64.whl", hash = "sha256:np-win"},
    {file = "numpy-1.26.0.tar.gz", hash = "sha256:np-src"},
]

[[package]]
name = "localpkg"
version = "0.1.0"
python-versions = "^3.12"

[package.source]
type = "directory"
url = "../localpkg"

[metadata]
lock-version = "2.0"
python-versions = "^3.8"
content-hash = "abc"
"#;

fn posix_env() -> TargetEnvironment {
    TargetEnvironment::new("3.11.4", OsFamily::Linux, "x86_64")
}

fn lock() -> LockFile {
    LockFile::from_toml(LOCK).expect("lock parses")
}

#[test]
fn test_filtered_dependency_end_to_end() {
    let env = posix_env();
    let overrides = Overrides::new().with("bar", |_, _, node| Ok(node.with_version("3.0")));
    let registry = RegistryBuilder::new(&env)
        .overrides(overrides)
        .build(&lock().packages())
        .expect("plan builds");

    let foo = registry.node("foo").unwrap().expect("foo is installable");
    assert!(!foo.broken);
    assert_eq!(
        foo.dependency_names().collect::<Vec<_>>(),
        vec!["bar", "typing-extensions"]
    );

    let edges = registry.dependencies_of("foo").unwrap();
    assert_eq!(edges[0], ("bar", &Entry::Filtered));
    assert!(registry.lookup("bar").unwrap().is_filtered());
}

#[test]
fn test_windows_environment_activates_edges() {
    let env = TargetEnvironment::new("3.11", OsFamily::Windows, "AMD64");
    let registry = RegistryBuilder::new(&env)
        .config(PlanConfig::new().with_binary_preference("numpy"))
        .build(&lock().packages())
        .expect("plan builds");

    let foo = registry.node("foo").unwrap().unwrap();
    assert!(foo.dependency_names().any(|d| d == "colorama"));
    assert!(registry.node("bar").unwrap().is_some());

    let numpy = registry.node("numpy").unwrap().unwrap();
    assert_eq!(numpy.artifact.hash, "sha256:np-win");
    assert!(!numpy.requirements.needs_patching());
}

#[test]
fn test_plan_snapshot() {
    let env = posix_env();
    let registry = RegistryBuilder::new(&env)
        .config(PlanConfig::new().with_binary_preference("numpy"))
        .build(&lock().packages())
        .expect("plan builds");
    let plan = BuildPlan::from_registry(&registry, &env);

    assert_eq!(plan.packages.len(), 6);
    assert_eq!(plan.filtered_count(), 1);
    assert_eq!(plan.broken, vec!["localpkg".to_string()]);

    match plan.get("numpy") {
        Some(PlanEntry::Installable {
            distribution_kind,
            patch_policy,
            native_deps,
            ..
        }) => {
            assert_eq!(*distribution_kind, DistributionKind::Binary);
            assert_eq!(patch_policy.as_deref(), Some("manylinux2014"));
            assert!(native_deps.contains("libstdc++"));
        }
        other => panic!("unexpected numpy entry: {:?}", other),
    }

    match plan.get("localpkg") {
        Some(PlanEntry::Installable { file, platform_tag, broken, .. }) => {
            assert_eq!(file, "../localpkg");
            assert_eq!(platform_tag, "source");
            assert!(*broken);
        }
        other => panic!("unexpected localpkg entry: {:?}", other),
    }
}

#[test]
fn test_lock_with_unknown_dependency_fails() {
    let text = LOCK.replace("bar = \"*\"", "ghost = \"*\"");
    let lock = LockFile::from_toml(&text).expect("lock parses");
    let err = RegistryBuilder::new(&posix_env())
        .build(&lock.packages())
        .unwrap_err();

    assert_eq!(err.package(), Some("foo"));
    assert_eq!(err.root(), &PlanError::unresolved("ghost"));
}

// =============================================================================
// Command-line front end
// =============================================================================

fn lockweave() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lockweave"))
}

#[test]
fn test_cli_constraint_left_fold() {
    let output = lockweave()
        .args(["constraint", "1.5", "<2 || >=3, !=1.5"])
        .output()
        .expect("binary runs");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "false");
}

#[test]
fn test_cli_marker_with_extra() {
    let output = lockweave()
        .args(["marker", r#"extra == "socks""#, "--extra", "SOCKS"])
        .output()
        .expect("binary runs");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
}

#[test]
fn test_cli_platform() {
    let output = lockweave()
        .args(["platform", "musllinux_1_2_x86_64"])
        .output()
        .expect("binary runs");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(value["patch_policy"], "musllinux_1_2");
}

#[test]
fn test_cli_plan_strict_exits_on_broken() {
    let lock_file = NamedTempFile::new().expect("temp file");
    std::fs::write(lock_file.path(), LOCK).expect("write lock");
    let env_file = NamedTempFile::new().expect("temp file");
    posix_env().save_to_file(env_file.path()).expect("write env");

    let output = lockweave()
        .arg("plan")
        .arg(lock_file.path())
        .arg("--env")
        .arg(env_file.path())
        .output()
        .expect("binary runs");
    assert!(output.status.success());
    let plan: BuildPlan = serde_json::from_slice(&output.stdout).expect("plan json");
    assert_eq!(plan.platform, OsFamily::Linux);

    let output = lockweave()
        .arg("plan")
        .arg(lock_file.path())
        .arg("--env")
        .arg(env_file.path())
        .arg("--strict")
        .arg("--summary")
        .output()
        .expect("binary runs");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("localpkg"));
}

#[test]
fn test_cli_plan_missing_lock_fails() {
    let output = lockweave()
        .args(["plan", "/nonexistent/poetry.lock"])
        .output()
        .expect("binary runs");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read lock file"));
}
