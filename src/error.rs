//! Error handling module for lockweave
//!
//! Provides the structured error taxonomy for build-plan construction using
//! thiserror. Every failure is construction-time and non-retryable: the core
//! never touches the network or the disk.

use thiserror::Error;

use crate::types::Field;

/// Main error type for build-plan construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A version string could not be parsed
    #[error("Invalid version '{version}'")]
    InvalidVersion { version: String },

    /// A comparator inside a constraint expression is malformed
    #[error("Invalid constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    /// A marker expression could not be parsed
    #[error("Invalid marker '{marker}': {reason}")]
    InvalidMarker { marker: String, reason: String },

    /// A marker references a variable outside the environment vocabulary
    #[error("Unknown marker variable '{variable}'")]
    UnknownMarkerVariable { variable: String },

    /// No candidate file qualifies for installation
    #[error("No artifact for {name} {version} matches the target environment")]
    NoArtifact { name: String, version: String },

    /// The lock file names a source type this planner cannot fetch
    #[error("Unsupported source type '{kind}'")]
    UnsupportedSourceType { kind: String },

    /// A dependency name is absent from the registry
    #[error("Unresolved dependency name '{dependency}'")]
    UnresolvedDependencyName { dependency: String },

    /// An override looked itself up (directly or transitively) while being built
    #[error("Override cycle detected while constructing '{name}'")]
    OverrideCycle { name: String },

    /// An override function rejected its input
    #[error("Override failed: {reason}")]
    Override { reason: String },

    /// An error attributed to one package and one of its fields
    #[error("{package} ({field}): {source}")]
    InPackage {
        package: String,
        field: Field,
        #[source]
        source: Box<PlanError>,
    },

    /// Several independent per-package failures reported together
    #[error("{} packages failed to plan: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<PlanError>),
}

/// Result type alias for planning operations
pub type Result<T> = std::result::Result<T, PlanError>;

fn join_errors(errors: &[PlanError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// Convenient error constructors
impl PlanError {
    /// Create an invalid constraint error
    pub fn constraint(constraint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConstraint {
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid marker error
    pub fn marker(marker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMarker {
            marker: marker.into(),
            reason: reason.into(),
        }
    }

    /// Create an override failure, for use inside override functions
    pub fn override_failed(reason: impl Into<String>) -> Self {
        Self::Override {
            reason: reason.into(),
        }
    }

    /// Create an unresolved dependency error
    pub fn unresolved(dependency: impl Into<String>) -> Self {
        Self::UnresolvedDependencyName {
            dependency: dependency.into(),
        }
    }

    /// Attribute this error to a package field
    pub fn in_package(self, package: impl Into<String>, field: Field) -> Self {
        Self::InPackage {
            package: package.into(),
            field,
            source: Box::new(self),
        }
    }

    /// Collapse a list of failures: one error stays as-is, more become `Multiple`
    pub fn aggregate(mut errors: Vec<PlanError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// The innermost error, with package attribution stripped
    pub fn root(&self) -> &PlanError {
        match self {
            Self::InPackage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The package this error is attributed to, if any
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::InPackage { package, .. } => Some(package),
            _ => None,
        }
    }

    /// Flatten `Multiple` into its individual failures
    pub fn flatten(&self) -> Vec<&PlanError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::constraint(">=x", "invalid version 'x'");
        assert_eq!(err.to_string(), "Invalid constraint '>=x': invalid version 'x'");

        let err = PlanError::unresolved("bar");
        assert_eq!(err.to_string(), "Unresolved dependency name 'bar'");
    }

    #[test]
    fn test_in_package_display_and_root() {
        let err = PlanError::UnsupportedSourceType {
            kind: "svn".to_string(),
        }
        .in_package("foo", Field::Source);
        assert_eq!(err.to_string(), "foo (source): Unsupported source type 'svn'");
        assert_eq!(err.package(), Some("foo"));
        assert!(matches!(err.root(), PlanError::UnsupportedSourceType { .. }));
    }

    #[test]
    fn test_aggregate() {
        assert!(PlanError::aggregate(Vec::new()).is_none());

        let single = PlanError::aggregate(vec![PlanError::unresolved("a")]);
        assert!(matches!(single, Some(PlanError::UnresolvedDependencyName { .. })));

        let many = PlanError::aggregate(vec![
            PlanError::unresolved("a"),
            PlanError::unresolved("b"),
        ])
        .expect("two errors aggregate");
        assert!(matches!(many, PlanError::Multiple(ref v) if v.len() == 2));
        assert_eq!(many.flatten().len(), 2);
        assert!(many.to_string().starts_with("2 packages failed to plan"));
    }
}
