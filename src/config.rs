//! Planner configuration
//!
//! Knobs that shape artifact selection but are not part of the lock file:
//! which filename extensions count as distributions, and where prebuilt
//! wheels should win over source archives.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::lockfile::normalize_name;

/// Suffix identifying a binary distribution
pub const WHEEL_SUFFIX: &str = ".whl";

/// Extensions recognized when no configuration is supplied
pub const DEFAULT_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".zip", ".whl"];

/// Configuration consumed by the artifact selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Recognized distribution filename suffixes, matched case-insensitively
    pub extensions: Vec<String>,
    /// Prefer a compatible wheel over a source archive for every package
    pub prefer_binary: bool,
    /// Prefer a compatible wheel for these packages only
    pub prefer_binary_for: BTreeSet<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            prefer_binary: false,
            prefer_binary_for: BTreeSet::new(),
        }
    }
}

impl PlanConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer wheels for one package
    pub fn with_binary_preference(mut self, package: &str) -> Self {
        self.prefer_binary_for.insert(normalize_name(package));
        self
    }

    /// Whether a compatible wheel should win over a source archive for `package`
    pub fn prefers_binary(&self, package: &str) -> bool {
        self.prefer_binary || self.prefer_binary_for.contains(&normalize_name(package))
    }

    /// Whether `file` ends in a recognized extension
    pub fn is_recognized(&self, file: &str) -> bool {
        let lowered = file.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| lowered.ends_with(&ext.to_ascii_lowercase()))
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize plan configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write plan configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read plan configuration from {:?}", path.as_ref()))?;

        let mut config: Self =
            serde_json::from_str(&content).context("Failed to parse plan configuration JSON")?;
        config.prefer_binary_for = config
            .prefer_binary_for
            .iter()
            .map(|name| normalize_name(name))
            .collect();

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            anyhow::bail!("At least one distribution extension must be configured");
        }

        for ext in &self.extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                anyhow::bail!("Extension '{}' must start with '.' and be non-empty", ext);
            }
        }

        if self.prefer_binary_for.iter().any(|name| name.trim().is_empty()) {
            anyhow::bail!("Binary preference entries cannot be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PlanConfig::new();
        assert!(config.validate().is_ok());
        assert!(config.is_recognized("foo-1.0.tar.gz"));
        assert!(config.is_recognized("foo-1.0-py3-none-any.whl"));
        assert!(config.is_recognized("FOO-1.0.ZIP"));
        assert!(!config.is_recognized("foo-1.0.exe"));
        assert!(!config.is_recognized("foo-1.0.egg"));
    }

    #[test]
    fn test_binary_preference() {
        let config = PlanConfig::new().with_binary_preference("NumPy");
        assert!(config.prefers_binary("numpy"));
        assert!(!config.prefers_binary("scipy"));

        let config = PlanConfig {
            prefer_binary: true,
            ..PlanConfig::default()
        };
        assert!(config.prefers_binary("anything"));
    }

    #[test]
    fn test_validate_rejects_bad_extensions() {
        let config = PlanConfig {
            extensions: Vec::new(),
            ..PlanConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PlanConfig {
            extensions: vec!["whl".to_string()],
            ..PlanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let file = NamedTempFile::new().expect("temp file");
        let config = PlanConfig::new().with_binary_preference("cryptography");

        config.save_to_file(file.path()).expect("save");
        let loaded = PlanConfig::load_from_file(file.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_normalizes_names() {
        let file = NamedTempFile::new().expect("temp file");
        std::fs::write(file.path(), r#"{"prefer_binary_for": ["Pillow_SIMD"]}"#).expect("write");

        let loaded = PlanConfig::load_from_file(file.path()).expect("load");
        assert!(loaded.prefers_binary("pillow-simd"));
        assert_eq!(loaded.extensions.len(), DEFAULT_EXTENSIONS.len());
    }
}
