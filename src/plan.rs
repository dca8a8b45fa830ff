//! Build plan snapshot
//!
//! A flat, serializable view of a finished [`Registry`], handed to whatever
//! fetches artifacts and runs the builds. Entries keep lock file order.
//!
//! ```json
//! {
//!   "python_version": "3.11.4",
//!   "platform": "linux",
//!   "machine": "x86_64",
//!   "packages": [
//!     {"status": "installable", "name": "foo", "version": "1.0", ...},
//!     {"status": "filtered", "name": "bar"}
//!   ],
//!   "broken": []
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::environment::TargetEnvironment;
use crate::lockfile::PackageSource;
use crate::registry::{Entry, Registry};
use crate::types::{DistributionKind, OsFamily};

/// One package of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlanEntry {
    Installable {
        name: String,
        version: String,
        source: PackageSource,
        file: String,
        hash: String,
        distribution_kind: DistributionKind,
        platform_tag: String,
        native_deps: BTreeSet<String>,
        patch_policy: Option<String>,
        dependencies: Vec<String>,
        broken: bool,
    },
    Filtered {
        name: String,
    },
}

impl PlanEntry {
    fn from_entry(name: &str, entry: &Entry) -> Self {
        match entry {
            Entry::Filtered => Self::Filtered {
                name: name.to_string(),
            },
            Entry::Installable(node) => Self::Installable {
                name: name.to_string(),
                version: node.version.clone(),
                source: node.source.clone(),
                file: node.artifact.file.clone(),
                hash: node.artifact.hash.clone(),
                distribution_kind: node.artifact.distribution_kind,
                platform_tag: node.artifact.platform_tag.clone(),
                native_deps: node.requirements.native_deps.clone(),
                patch_policy: node.requirements.patch_policy.clone(),
                dependencies: node.dependency_names().map(String::from).collect(),
                broken: node.broken,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Installable { name, .. } | Self::Filtered { name } => name,
        }
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, Self::Filtered { .. })
    }
}

/// Serializable snapshot of a registry for one target environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub python_version: String,
    pub platform: OsFamily,
    pub machine: String,
    pub packages: Vec<PlanEntry>,
    /// Names of installable packages whose `python-versions` the interpreter fails
    pub broken: Vec<String>,
}

impl BuildPlan {
    pub fn from_registry(registry: &Registry, env: &TargetEnvironment) -> Self {
        let packages: Vec<PlanEntry> = registry
            .entries()
            .map(|(name, entry)| PlanEntry::from_entry(name, entry))
            .collect();

        let broken = registry
            .broken()
            .into_iter()
            .map(|node| node.name.clone())
            .collect();

        Self {
            python_version: env.python_full_version().to_string(),
            platform: env.os,
            machine: env.machine.clone(),
            packages,
            broken,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PlanEntry> {
        let key = crate::lockfile::normalize_name(name);
        self.packages.iter().find(|p| p.name() == key)
    }

    pub fn installable_count(&self) -> usize {
        self.packages.iter().filter(|p| !p.is_filtered()).count()
    }

    pub fn filtered_count(&self) -> usize {
        self.packages.iter().filter(|p| p.is_filtered()).count()
    }

    pub fn has_broken(&self) -> bool {
        !self.broken.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize build plan to JSON")
    }

    /// Save plan to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json()?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write build plan to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Load plan from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read build plan from {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse build plan JSON")
    }
}

/// One line per package, for `plan --summary`
impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "python {} on {} ({}): {} installable, {} filtered, {} broken",
            self.python_version,
            self.platform,
            self.machine,
            self.installable_count(),
            self.filtered_count(),
            self.broken.len()
        )?;

        for entry in &self.packages {
            match entry {
                PlanEntry::Filtered { name } => writeln!(f, "  {:<32} filtered", name)?,
                PlanEntry::Installable {
                    name,
                    version,
                    distribution_kind,
                    platform_tag,
                    broken,
                    ..
                } => writeln!(
                    f,
                    "  {:<32} {:<16} {:<8} {}{}",
                    name,
                    version,
                    distribution_kind,
                    platform_tag,
                    if *broken { "  [broken]" } else { "" }
                )?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::LockedPackage;
    use crate::registry::{build, Overrides};
    use tempfile::NamedTempFile;

    fn plan() -> BuildPlan {
        let env = TargetEnvironment::new("3.11.4", OsFamily::Linux, "x86_64");
        let packages = vec![
            LockedPackage::new("foo", "1.0")
                .with_file("foo-1.0.tar.gz", "sha256:f")
                .with_dependency("bar")
                .with_python_versions(">=3.12"),
            LockedPackage::new("bar", "2.0")
                .with_file("bar-2.0.tar.gz", "sha256:b")
                .with_marker(r#"os_name == "nt""#),
        ];
        let registry = build(&packages, Overrides::new(), &env).unwrap();
        BuildPlan::from_registry(&registry, &env)
    }

    #[test]
    fn test_plan_from_registry() {
        let plan = plan();
        assert_eq!(plan.packages.len(), 2);
        assert_eq!(plan.installable_count(), 1);
        assert_eq!(plan.filtered_count(), 1);
        assert_eq!(plan.broken, vec!["foo".to_string()]);
        assert!(plan.has_broken());

        match plan.get("foo") {
            Some(PlanEntry::Installable { file, dependencies, .. }) => {
                assert_eq!(file, "foo-1.0.tar.gz");
                assert_eq!(dependencies, &vec!["bar".to_string()]);
            }
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(plan.get("bar").unwrap().is_filtered());
    }

    #[test]
    fn test_plan_json_shape() {
        let json = plan().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["platform"], "linux");
        assert_eq!(value["packages"][0]["status"], "installable");
        assert_eq!(value["packages"][0]["source"]["type"], "pypi");
        assert_eq!(value["packages"][0]["distribution_kind"], "source");
        assert_eq!(value["packages"][1]["status"], "filtered");
    }

    #[test]
    fn test_plan_file_round_trip() {
        let file = NamedTempFile::new().expect("temp file");
        let plan = plan();
        plan.save_to_file(file.path()).unwrap();
        assert_eq!(BuildPlan::load_from_file(file.path()).unwrap(), plan);
    }

    #[test]
    fn test_summary_lists_every_package() {
        let summary = plan().to_string();
        assert!(summary.starts_with("python 3.11.4 on linux (x86_64): 1 installable, 1 filtered, 1 broken"));
        assert!(summary.contains("[broken]"));
        assert!(summary.lines().any(|l| l.contains("bar") && l.ends_with("filtered")));
    }
}
