//! Lock file loading
//!
//! Reads a Poetry `poetry.lock` (TOML) into [`LockedPackage`] values. Only the
//! fields the planner needs are kept; everything else in the file is ignored.
//!
//! ```toml
//! [[package]]
//! name = "requests"
//! version = "2.31.0"
//! python-versions = ">=3.7"
//! files = [
//!     {file = "requests-2.31.0-py3-none-any.whl", hash = "sha256:..."},
//!     {file = "requests-2.31.0.tar.gz", hash = "sha256:..."},
//! ]
//!
//! [package.dependencies]
//! idna = ">=2.5,<4"
//! PySocks = {version = ">=1.5.6,!=1.5.7", optional = true, markers = "extra == \"socks\""}
//!
//! [metadata]
//! lock-version = "2.0"
//! python-versions = "^3.8"
//! ```
//!
//! Older lock files keep the candidate files in a `[metadata.files]` side
//! table keyed by package name; [`LockFile::packages`] merges the two.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::PlanError;

/// Normalize a package or extra name: lower case, with runs of `-`, `_` and
/// `.` folded to a single `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !out.is_empty() {
            out.push('-');
        }
        pending_separator = false;
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// One candidate distribution file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file: String,
    /// Integrity digest, passed through verbatim to the fetcher
    pub hash: String,
}

/// Source descriptor exactly as written in the lock file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub resolved_reference: Option<String>,
    #[serde(default)]
    pub subdirectory: Option<String>,
}

/// Where a locked package comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageSource {
    /// The default package index
    Pypi,
    /// An alternative package index
    Legacy { url: String },
    /// A git checkout pinned to a revision
    Git {
        url: String,
        reference: String,
        resolved_reference: Option<String>,
        subdirectory: Option<String>,
    },
    /// A direct archive URL
    Url { url: String },
    /// A local source tree
    Directory { path: String },
    /// A local archive
    File { path: String },
}

impl PackageSource {
    /// Interpret a raw source descriptor; `None` means the default index
    pub fn from_raw(raw: Option<&RawSource>) -> crate::error::Result<Self> {
        let Some(raw) = raw else {
            return Ok(Self::Pypi);
        };

        let source = match raw.kind.to_ascii_lowercase().as_str() {
            "" | "pypi" => Self::Pypi,
            "legacy" => Self::Legacy {
                url: raw.url.clone(),
            },
            "git" => Self::Git {
                url: raw.url.clone(),
                reference: raw
                    .reference
                    .clone()
                    .or_else(|| raw.resolved_reference.clone())
                    .unwrap_or_else(|| "HEAD".to_string()),
                resolved_reference: raw.resolved_reference.clone(),
                subdirectory: raw.subdirectory.clone(),
            },
            "url" => Self::Url {
                url: raw.url.clone(),
            },
            "directory" => Self::Directory {
                path: raw.url.clone(),
            },
            "file" => Self::File {
                path: raw.url.clone(),
            },
            other => {
                return Err(PlanError::UnsupportedSourceType {
                    kind: other.to_string(),
                });
            }
        };

        Ok(source)
    }

    /// Whether the artifact is chosen from a file list (index sources)
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Pypi | Self::Legacy { .. })
    }

    /// Location handed to the fetcher for non-index sources
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Pypi | Self::Legacy { .. } => None,
            Self::Git { url, reference, .. } => Some(format!("{}@{}", url, reference)),
            Self::Url { url } => Some(url.clone()),
            Self::Directory { path } | Self::File { path } => Some(path.clone()),
        }
    }
}

/// One dependency edge as written in the lock file
///
/// Only the name (the table key) and the optional `markers` matter to the
/// planner. Multiple-constraint dependencies are written as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Version(String),
    Detailed(DetailedDependency),
    Multiple(Vec<DetailedDependency>),
}

/// Table form of a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailedDependency {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub markers: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub extras: Vec<String>,
}

impl DependencySpec {
    /// Edge markers; an empty list means the edge is unconditional
    ///
    /// For the array form the edge is active when any entry's marker holds,
    /// and an entry without a marker makes the whole edge unconditional.
    pub fn markers(&self) -> Vec<&str> {
        match self {
            Self::Version(_) => Vec::new(),
            Self::Detailed(detail) => detail.markers.as_deref().into_iter().collect(),
            Self::Multiple(details) => {
                if details.iter().any(|d| d.markers.is_none()) {
                    Vec::new()
                } else {
                    details.iter().filter_map(|d| d.markers.as_deref()).collect()
                }
            }
        }
    }
}

/// One `[[package]]` entry of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    #[serde(rename = "python-versions", default = "any_python")]
    pub python_versions: String,
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
    #[serde(default)]
    pub source: Option<RawSource>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

fn any_python() -> String {
    "*".to_string()
}

impl LockedPackage {
    /// Create a package with no files, dependencies, marker or source
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            python_versions: any_python(),
            marker: None,
            dependencies: BTreeMap::new(),
            source: None,
            files: Vec::new(),
        }
    }

    /// Normalized identity key
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Add an unconditional dependency
    pub fn with_dependency(mut self, name: &str) -> Self {
        self.dependencies
            .insert(name.to_string(), DependencySpec::Version("*".to_string()));
        self
    }

    /// Add a dependency gated by an edge marker
    pub fn with_dependency_marker(mut self, name: &str, markers: &str) -> Self {
        self.dependencies.insert(
            name.to_string(),
            DependencySpec::Detailed(DetailedDependency {
                version: Some("*".to_string()),
                markers: Some(markers.to_string()),
                ..DetailedDependency::default()
            }),
        );
        self
    }

    /// Set the package-level marker
    pub fn with_marker(mut self, marker: &str) -> Self {
        self.marker = Some(marker.to_string());
        self
    }

    /// Set the `python-versions` constraint
    pub fn with_python_versions(mut self, constraint: &str) -> Self {
        self.python_versions = constraint.to_string();
        self
    }

    /// Append a candidate file
    pub fn with_file(mut self, file: &str, hash: &str) -> Self {
        self.files.push(FileEntry {
            file: file.to_string(),
            hash: hash.to_string(),
        });
        self
    }

    /// Set the source descriptor
    pub fn with_source(mut self, source: RawSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// `[metadata]` table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockMetadata {
    #[serde(rename = "lock-version", default)]
    pub lock_version: Option<String>,
    #[serde(rename = "python-versions", default)]
    pub python_versions: Option<String>,
    #[serde(rename = "content-hash", default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, Vec<FileEntry>>,
}

/// Parsed lock file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(rename = "package", default)]
    pub packages: Vec<LockedPackage>,
    #[serde(default)]
    pub metadata: LockMetadata,
}

impl LockFile {
    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load a lock file from disk
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read lock file {:?}", path.as_ref()))?;

        let lock = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse lock file {:?}", path.as_ref()))?;

        Ok(lock)
    }

    /// Locked packages in file order, with `metadata.files` merged in for
    /// packages that carry no inline `files`
    pub fn packages(&self) -> Vec<LockedPackage> {
        let side_table: BTreeMap<String, &Vec<FileEntry>> = self
            .metadata
            .files
            .iter()
            .map(|(name, files)| (normalize_name(name), files))
            .collect();

        self.packages
            .iter()
            .map(|package| {
                let mut package = package.clone();
                if package.files.is_empty() {
                    if let Some(files) = side_table.get(&package.key()) {
                        package.files = (*files).clone();
                    }
                }
                package
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const LOCK: &str = r#"
[[package]]
name = "Foo_Bar"
version = "1.0"
description = "ignored"
optional = false
python-versions = ">=3.8,<4.0"
files = [
    {file = "foo_bar-1.0.tar.gz", hash = "sha256:aaa"},
]

[package.dependencies]
idna = ">=2.5"
pysocks = {version = ">=1.5.6", optional = true, markers = "extra == \"socks\""}
colorama = [
    {version = "0.4.6", markers = "sys_platform == \"win32\""},
    {version = "0.4.5", markers = "os_name == \"nt\""},
]

[[package]]
name = "idna"
version = "3.4"
python-versions = ">=3.5"

[[package]]
name = "vcs-thing"
version = "0.1.0"

[package.source]
type = "git"
url = "https://example.com/vcs-thing.git"
reference = "main"
resolved_reference = "0123abcd"

[metadata]
lock-version = "1.1"
python-versions = "^3.8"
content-hash = "deadbeef"

[metadata.files]
IDNA = [
    {file = "idna-3.4-py3-none-any.whl", hash = "sha256:bbb"},
]
"#;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Foo_Bar"), "foo-bar");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("A--B__c"), "a-b-c");
        assert_eq!(normalize_name("  requests "), "requests");
    }

    #[test]
    fn test_parse_lock_file() {
        let lock = LockFile::from_toml(LOCK).expect("lock parses");
        assert_eq!(lock.packages.len(), 3);
        assert_eq!(lock.metadata.lock_version.as_deref(), Some("1.1"));

        let foo = &lock.packages[0];
        assert_eq!(foo.key(), "foo-bar");
        assert_eq!(foo.python_versions, ">=3.8,<4.0");
        assert_eq!(foo.files.len(), 1);
        assert_eq!(foo.dependencies.len(), 3);
    }

    #[test]
    fn test_missing_python_versions_means_any() {
        let lock = LockFile::from_toml(LOCK).expect("lock parses");
        assert_eq!(lock.packages[2].python_versions, "*");
    }

    #[test]
    fn test_dependency_markers() {
        let lock = LockFile::from_toml(LOCK).expect("lock parses");
        let deps = &lock.packages[0].dependencies;

        assert!(deps["idna"].markers().is_empty());
        assert_eq!(deps["pysocks"].markers(), vec![r#"extra == "socks""#]);
        assert_eq!(deps["colorama"].markers().len(), 2);
    }

    #[test]
    fn test_metadata_files_merged() {
        let lock = LockFile::from_toml(LOCK).expect("lock parses");
        let packages = lock.packages();

        assert_eq!(packages[1].files.len(), 1);
        assert_eq!(packages[1].files[0].file, "idna-3.4-py3-none-any.whl");
        // Inline files are kept as-is.
        assert_eq!(packages[0].files[0].hash, "sha256:aaa");
    }

    #[test]
    fn test_package_source_from_raw() {
        let lock = LockFile::from_toml(LOCK).expect("lock parses");
        let source = PackageSource::from_raw(lock.packages[2].source.as_ref()).unwrap();
        assert_eq!(
            source,
            PackageSource::Git {
                url: "https://example.com/vcs-thing.git".to_string(),
                reference: "main".to_string(),
                resolved_reference: Some("0123abcd".to_string()),
                subdirectory: None,
            }
        );
        assert!(!source.is_index());
        assert_eq!(
            source.location().as_deref(),
            Some("https://example.com/vcs-thing.git@main")
        );

        assert_eq!(PackageSource::from_raw(None).unwrap(), PackageSource::Pypi);
    }

    #[test]
    fn test_unsupported_source_type() {
        let raw = RawSource {
            kind: "svn".to_string(),
            ..RawSource::default()
        };
        assert_eq!(
            PackageSource::from_raw(Some(&raw)).unwrap_err(),
            PlanError::UnsupportedSourceType {
                kind: "svn".to_string()
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let file = NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), LOCK).expect("write");

        let lock = LockFile::load_from_file(file.path()).expect("load");
        assert_eq!(lock.packages.len(), 3);
    }

    #[test]
    fn test_load_invalid_toml_fails() {
        let file = NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), "[[package]\nname = ").expect("write");
        assert!(LockFile::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let pkg = LockedPackage::new("foo", "1.0")
            .with_dependency("bar")
            .with_dependency_marker("baz", r#"os_name == "nt""#)
            .with_marker(r#"python_version >= "3""#)
            .with_python_versions(">=3.8")
            .with_file("foo-1.0.tar.gz", "sha256:x");

        assert_eq!(pkg.dependencies.len(), 2);
        assert!(pkg.dependencies["bar"].markers().is_empty());
        assert_eq!(pkg.files.len(), 1);
        assert_eq!(pkg.python_versions, ">=3.8");
    }
}
