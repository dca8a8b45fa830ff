//! Artifact Selector
//!
//! Picks the single distribution file to install for a locked package.
//!
//! # Selection Rules
//!
//! 1. Candidates must contain the locked version string and end in a
//!    recognized extension.
//! 2. Candidates split into source archives and wheels (`.whl`).
//! 3. A source archive wins unless binary preference applies to the package;
//!    otherwise the first wheel (in lock order) the [`WheelTagSelector`]
//!    accepts wins, falling back to a source archive if none is compatible.
//!
//! Selection is a pure function of its inputs: the same file list and
//! environment always give the same artifact.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PlanConfig, WHEEL_SUFFIX};
use crate::environment::TargetEnvironment;
use crate::error::{PlanError, Result};
use crate::lockfile::FileEntry;
use crate::types::{DistributionKind, Implementation, OsFamily};

/// Platform tag recorded for source distributions
pub const SOURCE_PLATFORM_TAG: &str = "source";

/// The file chosen for installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedArtifact {
    pub file: String,
    pub hash: String,
    pub distribution_kind: DistributionKind,
    /// `source` for source builds, the wheel's platform field otherwise
    pub platform_tag: String,
}

impl SelectedArtifact {
    /// A source artifact for a non-index location (git, url, local path)
    pub fn from_location(location: String, hash: String) -> Self {
        Self {
            file: location,
            hash,
            distribution_kind: DistributionKind::Source,
            platform_tag: SOURCE_PLATFORM_TAG.to_string(),
        }
    }

    fn from_entry(entry: &FileEntry, kind: DistributionKind, platform_tag: String) -> Self {
        Self {
            file: entry.file.clone(),
            hash: entry.hash.clone(),
            distribution_kind: kind,
            platform_tag,
        }
    }
}

// ============================================================================
// Wheel Tags
// ============================================================================

/// Fields of a wheel filename:
/// `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
///
/// Each tag field may be a compressed set joined by `.`, e.g. `py2.py3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTags {
    pub name: String,
    pub version: String,
    pub build: Option<String>,
    pub python: Vec<String>,
    pub abi: Vec<String>,
    pub platform: Vec<String>,
}

impl WheelTags {
    /// Parse a wheel filename; `None` if it does not have the wheel shape
    pub fn parse(filename: &str) -> Option<Self> {
        let lowered = filename.to_ascii_lowercase();
        let stem = lowered.strip_suffix(WHEEL_SUFFIX)?;
        let parts: Vec<&str> = stem.split('-').collect();

        let (name, version, build, python, abi, platform) = match parts.as_slice() {
            [name, version, python, abi, platform] => (name, version, None, python, abi, platform),
            [name, version, build, python, abi, platform] => {
                (name, version, Some(build.to_string()), python, abi, platform)
            }
            _ => return None,
        };

        let split = |field: &str| field.split('.').map(String::from).collect::<Vec<_>>();
        Some(Self {
            name: name.to_string(),
            version: version.to_string(),
            build,
            python: split(*python),
            abi: split(*abi),
            platform: split(*platform),
        })
    }

    /// The platform field as written, e.g. `manylinux_2_17_x86_64.manylinux2014_x86_64`
    pub fn platform_tag(&self) -> String {
        self.platform.join(".")
    }
}

/// Decides whether a wheel can be installed into an environment
pub trait WheelTagSelector {
    fn is_compatible(&self, tags: &WheelTags, env: &TargetEnvironment) -> bool;
}

impl<F> WheelTagSelector for F
where
    F: Fn(&WheelTags, &TargetEnvironment) -> bool,
{
    fn is_compatible(&self, tags: &WheelTags, env: &TargetEnvironment) -> bool {
        self(tags, env)
    }
}

/// Default compatibility check derived from the target environment
///
/// Accepts a wheel when some python tag, some ABI tag and some platform tag
/// each match the interpreter and platform. It does not rank: among several
/// compatible wheels the selector takes the first in lock order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentTags;

impl WheelTagSelector for EnvironmentTags {
    fn is_compatible(&self, tags: &WheelTags, env: &TargetEnvironment) -> bool {
        let Some((major, minor)) = env.python_major_minor() else {
            return false;
        };
        let abi3 = tags.abi.iter().any(|a| a == "abi3");

        tags.python
            .iter()
            .any(|t| python_tag_matches(t, env.implementation, major, minor, abi3))
            && tags
                .abi
                .iter()
                .any(|a| abi_tag_matches(a, env.implementation, major, minor))
            && tags.platform.iter().any(|p| platform_tag_matches(p, env))
    }
}

fn python_tag_matches(tag: &str, implementation: Implementation, major: u64, minor: u64, abi3: bool) -> bool {
    let generic = format!("py{}", major);
    if tag == generic {
        return true;
    }
    // py38 style tags are accepted by later minors of the same major.
    if let Some(tag_minor) = tag.strip_prefix(&generic).and_then(|m| m.parse::<u64>().ok()) {
        return tag_minor <= minor;
    }

    let specific = format!("{}{}", implementation.tag_prefix(), major);
    match tag.strip_prefix(&specific).and_then(|m| m.parse::<u64>().ok()) {
        Some(tag_minor) if abi3 => tag_minor <= minor,
        Some(tag_minor) => tag_minor == minor,
        None => false,
    }
}

fn abi_tag_matches(tag: &str, implementation: Implementation, major: u64, minor: u64) -> bool {
    match tag {
        "none" => true,
        "abi3" => implementation == Implementation::CPython,
        _ => match implementation {
            Implementation::CPython => {
                let exact = format!("cp{}{}", major, minor);
                tag.strip_prefix(&exact)
                    .is_some_and(|flags| flags.chars().all(|c| matches!(c, 'd' | 'm' | 'u')))
            }
            Implementation::PyPy => tag.starts_with(&format!("pypy{}{}", major, minor)),
        },
    }
}

fn platform_tag_matches(tag: &str, env: &TargetEnvironment) -> bool {
    if tag == "any" {
        return true;
    }

    let machine = env.machine.to_ascii_lowercase();
    match env.os {
        OsFamily::Linux => {
            let arch = match machine.as_str() {
                "amd64" => "x86_64",
                "arm64" => "aarch64",
                other => other,
            };
            (tag.starts_with(env.libc.wheel_tag_prefix()) || tag.starts_with("linux_"))
                && tag.ends_with(&format!("_{}", arch))
        }
        OsFamily::Darwin => {
            let arch = match machine.as_str() {
                "aarch64" => "arm64",
                "amd64" => "x86_64",
                other => other,
            };
            tag.starts_with("macosx_")
                && (tag.ends_with(&format!("_{}", arch))
                    || tag.ends_with("_universal2")
                    || tag.ends_with("_universal")
                    || (arch == "x86_64" && tag.ends_with("_intel")))
        }
        OsFamily::Windows => match machine.as_str() {
            "x86_64" | "amd64" => tag == "win_amd64",
            "arm64" | "aarch64" => tag == "win_arm64",
            "x86" | "i386" | "i686" => tag == "win32",
            _ => false,
        },
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Artifact selector bound to a configuration and a wheel tag policy
pub struct ArtifactSelector<'a> {
    config: &'a PlanConfig,
    wheel_tags: &'a dyn WheelTagSelector,
}

impl<'a> ArtifactSelector<'a> {
    pub fn new(config: &'a PlanConfig, wheel_tags: &'a dyn WheelTagSelector) -> Self {
        Self { config, wheel_tags }
    }

    /// Pick the file to install for `name` at `version`
    pub fn select(
        &self,
        name: &str,
        version: &str,
        files: &[FileEntry],
        env: &TargetEnvironment,
    ) -> Result<SelectedArtifact> {
        let (binaries, sources): (Vec<&FileEntry>, Vec<&FileEntry>) = files
            .iter()
            .filter(|entry| entry.file.contains(version) && self.config.is_recognized(&entry.file))
            .partition(|entry| entry.file.to_ascii_lowercase().ends_with(WHEEL_SUFFIX));

        let first_source = sources.first().copied();
        let prefer_binary = self.config.prefers_binary(name);

        if let Some(source) = first_source.filter(|_| !prefer_binary) {
            debug!("{} {}: selected source archive {}", name, version, source.file);
            return Ok(SelectedArtifact::from_entry(
                source,
                DistributionKind::Source,
                SOURCE_PLATFORM_TAG.to_string(),
            ));
        }

        let wheel = binaries.iter().find_map(|entry| {
            let tags = WheelTags::parse(&entry.file)?;
            self.wheel_tags
                .is_compatible(&tags, env)
                .then(|| (*entry, tags.platform_tag()))
        });

        match (wheel, first_source) {
            (Some((entry, platform_tag)), _) => {
                debug!("{} {}: selected wheel {}", name, version, entry.file);
                Ok(SelectedArtifact::from_entry(entry, DistributionKind::Binary, platform_tag))
            }
            (None, Some(source)) => {
                debug!(
                    "{} {}: no compatible wheel, falling back to {}",
                    name, version, source.file
                );
                Ok(SelectedArtifact::from_entry(
                    source,
                    DistributionKind::Source,
                    SOURCE_PLATFORM_TAG.to_string(),
                ))
            }
            (None, None) => Err(PlanError::NoArtifact {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }
}

/// Select with the default configuration and [`EnvironmentTags`]
pub fn select(
    name: &str,
    version: &str,
    files: &[FileEntry],
    env: &TargetEnvironment,
) -> Result<SelectedArtifact> {
    let config = PlanConfig::default();
    ArtifactSelector::new(&config, &EnvironmentTags).select(name, version, files, env)
}
