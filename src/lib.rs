//! lockweave Library
//!
//! Turns a resolved `poetry.lock` plus a target environment description into
//! a build plan: one installable node or `Filtered` entry per package, with
//! the chosen artifact, its native runtime needs, and by-name dependency
//! edges. Per-package override functions can replace any node; dependents
//! always observe the overridden node.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod constraint;
pub mod environment;
pub mod error;
pub mod lockfile;
pub mod marker;
pub mod plan;
pub mod platform;
pub mod registry;
pub mod types;
pub mod version;

// Re-export main types for convenience
pub use artifact::{ArtifactSelector, EnvironmentTags, SelectedArtifact, WheelTagSelector, WheelTags};
pub use config::PlanConfig;
pub use environment::TargetEnvironment;
pub use error::PlanError;
pub use lockfile::{FileEntry, LockFile, LockedPackage, PackageSource};
pub use marker::Marker;
pub use plan::{BuildPlan, PlanEntry};
pub use platform::PlatformRequirements;
pub use registry::{
    BaseRegistry, BuildNode, DependencyRef, Entry, OverrideFn, Overrides, Registry, RegistryBuilder,
};
pub use types::{DistributionKind, Field, Implementation, Libc, OsFamily};
pub use version::Version;
