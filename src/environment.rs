//! Target environment descriptor
//!
//! Describes the interpreter and platform a build plan is computed for.
//! Supplied once per build and shared read-only by the marker evaluator,
//! the constraint check for `python-versions`, and wheel tag matching.
//!
//! Environments can be saved to and loaded from JSON:
//!
//! ```json
//! {
//!   "python_version": "3.11.4",
//!   "os": "linux",
//!   "machine": "x86_64",
//!   "libc": "glibc",
//!   "implementation": "cpython",
//!   "extras": ["socks"]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::lockfile::normalize_name;
use crate::types::{Implementation, Libc, OsFamily};
use crate::version::Version;

/// Immutable description of the interpreter and platform being targeted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetEnvironment {
    /// Full interpreter version, e.g. `3.11.4` (a two-part `3.11` is accepted)
    pub python_version: String,
    pub os: OsFamily,
    /// Machine architecture as reported by `platform.machine()`
    pub machine: String,
    /// Only consulted for Linux wheel tags
    pub libc: Libc,
    pub implementation: Implementation,
    /// Defaults to `python_version` when unset
    pub implementation_version: Option<String>,
    pub platform_release: String,
    pub platform_version: String,
    /// Active extras, matched by `extra == "..."` markers
    pub extras: BTreeSet<String>,
}

impl Default for TargetEnvironment {
    fn default() -> Self {
        Self {
            python_version: "3.11".to_string(),
            os: OsFamily::Linux,
            machine: "x86_64".to_string(),
            libc: Libc::Glibc,
            implementation: Implementation::CPython,
            implementation_version: None,
            platform_release: String::new(),
            platform_version: String::new(),
            extras: BTreeSet::new(),
        }
    }
}

impl TargetEnvironment {
    /// Create an environment for a CPython interpreter
    pub fn new(python_version: impl Into<String>, os: OsFamily, machine: impl Into<String>) -> Self {
        Self {
            python_version: python_version.into(),
            os,
            machine: machine.into(),
            ..Self::default()
        }
    }

    /// Use a different interpreter implementation
    pub fn with_implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    /// Target a different C library
    pub fn with_libc(mut self, libc: Libc) -> Self {
        self.libc = libc;
        self
    }

    /// Activate an extra
    pub fn with_extra(mut self, extra: &str) -> Self {
        self.extras.insert(normalize_name(extra));
        self
    }

    /// Whether `extra` is active, compared by normalized name
    pub fn has_extra(&self, extra: &str) -> bool {
        self.extras.contains(&normalize_name(extra))
    }

    /// Value of `python_full_version`
    pub fn python_full_version(&self) -> &str {
        self.python_version.trim()
    }

    /// Value of `python_version`: the first two release segments
    pub fn python_short_version(&self) -> String {
        let mut parts = self.python_full_version().split('.');
        match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("{}.{}", major, minor),
            (Some(major), None) => major.to_string(),
            _ => String::new(),
        }
    }

    /// Value of `implementation_version`
    pub fn implementation_version(&self) -> &str {
        self.implementation_version
            .as_deref()
            .unwrap_or_else(|| self.python_full_version())
    }

    /// Parsed interpreter version
    pub fn interpreter_version(&self) -> crate::error::Result<Version> {
        Version::parse(self.python_full_version())
    }

    /// Interpreter `(major, minor)`, used for wheel tags like `cp311`
    pub fn python_major_minor(&self) -> Option<(u64, u64)> {
        let version = self.interpreter_version().ok()?;
        let release = version.release();
        Some((release[0], release.get(1).copied().unwrap_or(0)))
    }

    /// Save environment to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize target environment to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write target environment to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load environment from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read target environment from {:?}", path.as_ref()))?;

        let mut env: Self =
            serde_json::from_str(&content).context("Failed to parse target environment JSON")?;
        env.extras = env.extras.iter().map(|e| normalize_name(e)).collect();

        Ok(env)
    }

    /// Validate the environment
    pub fn validate(&self) -> Result<()> {
        Version::parse(self.python_full_version())
            .with_context(|| format!("Invalid python_version '{}'", self.python_version))?;

        if let Some(ref version) = self.implementation_version {
            Version::parse(version)
                .with_context(|| format!("Invalid implementation_version '{}'", version))?;
        }

        let machine = self.machine.trim();
        if machine.is_empty() {
            anyhow::bail!("Machine architecture must be specified");
        }
        if !machine.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("Machine architecture can only contain letters, numbers, and underscores");
        }

        if self.extras.iter().any(|e| e.trim().is_empty()) {
            anyhow::bail!("Extras cannot be empty strings");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_environment() {
        let env = TargetEnvironment::default();
        assert_eq!(env.python_version, "3.11");
        assert_eq!(env.os, OsFamily::Linux);
        assert_eq!(env.machine, "x86_64");
        assert_eq!(env.libc, Libc::Glibc);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_version_views() {
        let env = TargetEnvironment::new("3.11.4", OsFamily::Linux, "x86_64");
        assert_eq!(env.python_full_version(), "3.11.4");
        assert_eq!(env.python_short_version(), "3.11");
        assert_eq!(env.implementation_version(), "3.11.4");
        assert_eq!(env.python_major_minor(), Some((3, 11)));
    }

    #[test]
    fn test_extras_are_normalized() {
        let env = TargetEnvironment::default().with_extra("Socks_Proxy");
        assert!(env.has_extra("socks-proxy"));
        assert!(env.has_extra("SOCKS.proxy"));
        assert!(!env.has_extra("security"));
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let env = TargetEnvironment::new("three", OsFamily::Linux, "x86_64");
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_machine() {
        let env = TargetEnvironment::new("3.11", OsFamily::Linux, "");
        assert!(env.validate().is_err());

        let env = TargetEnvironment::new("3.11", OsFamily::Linux, "x86 64");
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let file = NamedTempFile::new().expect("temp file");
        let env = TargetEnvironment::new("3.10.2", OsFamily::Darwin, "arm64")
            .with_implementation(Implementation::PyPy)
            .with_extra("docs");

        env.save_to_file(file.path()).expect("save");
        let loaded = TargetEnvironment::load_from_file(file.path()).expect("load");
        assert_eq!(loaded, env);
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let file = NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), r#"{"python_version": "3.9", "os": "windows"}"#)
            .expect("write");

        let env = TargetEnvironment::load_from_file(file.path()).expect("load");
        assert_eq!(env.python_version, "3.9");
        assert_eq!(env.os, OsFamily::Windows);
        assert_eq!(env.machine, "x86_64");
        assert_eq!(env.libc, Libc::Glibc);

        std::fs::write(file.path(), r#"{"python_version": "3.12", "libc": "musl"}"#)
            .expect("write");
        let env = TargetEnvironment::load_from_file(file.path()).expect("load");
        assert_eq!(env.libc, Libc::Musl);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = TargetEnvironment::load_from_file("/nonexistent/env.json");
        assert!(result.is_err());
    }
}
