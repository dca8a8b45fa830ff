//! Registry Builder
//!
//! Combines marker evaluation, constraint checking, artifact selection and
//! platform resolution over the whole locked package list, producing a
//! [`Registry`] that maps every package name to an installable
//! [`BuildNode`] or to [`Entry::Filtered`].
//!
//! # Design
//!
//! - **Two phases**: default entries are built first into a [`BaseRegistry`]
//!   (the "super" view, no overrides applied). The final [`Registry`] then
//!   holds one lazily-initialized cell per name.
//! - **Single fixed point**: an override receives the final registry itself,
//!   so looking up another package forces that package (and its override)
//!   first. Re-entering a cell that is still under construction is an
//!   [`PlanError::OverrideCycle`].
//! - **By-name edges**: nodes never own each other. A dependency edge is a
//!   name resolved against the final registry, so an overridden node is what
//!   every dependent observes.
//! - **Collect, don't stop**: every package is processed and all failures
//!   are reported together. A failure is never turned into `Filtered`.

use serde::{Deserialize, Serialize};
use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactSelector, EnvironmentTags, SelectedArtifact, WheelTagSelector};
use crate::config::PlanConfig;
use crate::constraint;
use crate::environment::TargetEnvironment;
use crate::error::{PlanError, Result};
use crate::lockfile::{normalize_name, LockedPackage, PackageSource};
use crate::marker::{self, Marker};
use crate::platform::{self, PlatformRequirements};
use crate::types::Field;

// ============================================================================
// Nodes and Entries
// ============================================================================

/// A dependency edge, resolved by name against the final registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyRef {
    pub name: String,
}

impl DependencyRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_name(name),
        }
    }
}

/// Everything the build executor needs to install one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNode {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
    pub artifact: SelectedArtifact,
    pub requirements: PlatformRequirements,
    pub dependencies: Vec<DependencyRef>,
    /// The interpreter fails the package's `python-versions` constraint
    pub broken: bool,
    pub python_versions: String,
}

impl BuildNode {
    /// Add a dependency edge unless it is already present
    pub fn with_dependency(mut self, name: &str) -> Self {
        let dep = DependencyRef::new(name);
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Drop a dependency edge
    pub fn without_dependency(mut self, name: &str) -> Self {
        let dep = DependencyRef::new(name);
        self.dependencies.retain(|d| d != &dep);
        self
    }

    /// Replace the artifact; platform requirements follow the new artifact
    pub fn with_artifact(mut self, artifact: SelectedArtifact) -> Self {
        self.requirements = platform::resolve(&artifact.platform_tag);
        self.artifact = artifact;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }
}

/// One registry slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Installable(BuildNode),
    /// The package's marker is false for the target environment
    Filtered,
}

impl Entry {
    pub fn is_filtered(&self) -> bool {
        matches!(self, Self::Filtered)
    }

    pub fn node(&self) -> Option<&BuildNode> {
        match self {
            Self::Installable(node) => Some(node),
            Self::Filtered => None,
        }
    }
}

// ============================================================================
// Overrides
// ============================================================================

/// Per-package customization: `(self, super, default node) -> node`
pub type OverrideFn = Box<dyn Fn(&Registry, &BaseRegistry, BuildNode) -> Result<BuildNode>>;

/// Override functions keyed by normalized package name
#[derive(Default)]
pub struct Overrides {
    functions: BTreeMap<String, OverrideFn>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override, replacing any previous one for the same name
    pub fn insert<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&Registry, &BaseRegistry, BuildNode) -> Result<BuildNode> + 'static,
    {
        self.functions.insert(normalize_name(name), Box::new(function));
    }

    /// Builder form of [`Overrides::insert`]
    pub fn with<F>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(&Registry, &BaseRegistry, BuildNode) -> Result<BuildNode> + 'static,
    {
        self.insert(name, function);
        self
    }

    /// `None` means identity
    pub fn get(&self, name: &str) -> Option<&OverrideFn> {
        self.functions.get(&normalize_name(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

// ============================================================================
// Base Registry
// ============================================================================

/// Default entries with no overrides applied
#[derive(Debug, Clone)]
pub struct BaseRegistry {
    entries: BTreeMap<String, Result<Entry>>,
    order: Vec<String>,
}

impl BaseRegistry {
    /// Look up the default entry for `name`
    pub fn lookup(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(&normalize_name(name))
            .ok_or_else(|| PlanError::unresolved(name))?
            .as_ref()
            .map_err(Clone::clone)
    }

    /// The default node for `name`, `None` when filtered
    pub fn node(&self, name: &str) -> Result<Option<&BuildNode>> {
        Ok(self.lookup(name)?.node())
    }

    /// Normalized names in lock file order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_name(name))
    }
}

// ============================================================================
// Final Registry
// ============================================================================

/// The fixed-point mapping from package name to entry
pub struct Registry {
    base: BaseRegistry,
    cells: BTreeMap<String, OnceCell<Result<Entry>>>,
    overrides: Overrides,
    in_progress: RefCell<Vec<String>>,
}

impl Registry {
    fn new(base: BaseRegistry, overrides: Overrides) -> Self {
        let cells = base
            .names()
            .map(|name| (name.to_string(), OnceCell::new()))
            .collect();

        Self {
            base,
            cells,
            overrides,
            in_progress: RefCell::new(Vec::new()),
        }
    }

    /// Look up the final entry for `name`, constructing it on first use
    ///
    /// A name absent from the lock file is [`PlanError::UnresolvedDependencyName`],
    /// which is distinct from an [`Entry::Filtered`] slot.
    pub fn lookup(&self, name: &str) -> Result<&Entry> {
        let key = normalize_name(name);
        let cell = self
            .cells
            .get(&key)
            .ok_or_else(|| PlanError::unresolved(name))?;

        if let Some(result) = cell.get() {
            return result.as_ref().map_err(Clone::clone);
        }

        if self.in_progress.borrow().contains(&key) {
            warn!(
                "Override cycle: {} -> {}",
                self.in_progress.borrow().join(" -> "),
                key
            );
            return Err(PlanError::OverrideCycle { name: key });
        }

        self.in_progress.borrow_mut().push(key.clone());
        let result = self.construct(&key);
        self.in_progress.borrow_mut().pop();

        cell.get_or_init(|| result).as_ref().map_err(Clone::clone)
    }

    /// The final node for `name`, `None` when filtered
    pub fn node(&self, name: &str) -> Result<Option<&BuildNode>> {
        Ok(self.lookup(name)?.node())
    }

    fn construct(&self, key: &str) -> Result<Entry> {
        let node = match self.base.lookup(key)? {
            Entry::Filtered => return Ok(Entry::Filtered),
            Entry::Installable(node) => node.clone(),
        };

        match self.overrides.get(key) {
            None => Ok(Entry::Installable(node)),
            Some(function) => {
                debug!("Applying override for {}", key);
                function(self, &self.base, node)
                    .map(Entry::Installable)
                    .map_err(|e| e.in_package(key, Field::Override))
            }
        }
    }

    /// The default registry this one was derived from
    pub fn base(&self) -> &BaseRegistry {
        &self.base
    }

    /// Resolve every dependency edge of `name`
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<(&str, &Entry)>> {
        let Some(node) = self.node(name)? else {
            return Ok(Vec::new());
        };

        node.dependencies
            .iter()
            .map(|dep| Ok((dep.name.as_str(), self.lookup(&dep.name)?)))
            .collect()
    }

    /// Entries in lock file order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.base.order.iter().filter_map(move |name| {
            let entry = self.cells.get(name)?.get()?.as_ref().ok()?;
            Some((name.as_str(), entry))
        })
    }

    /// Installable nodes whose `python-versions` the interpreter fails
    pub fn broken(&self) -> Vec<&BuildNode> {
        self.entries()
            .filter_map(|(_, entry)| entry.node())
            .filter(|node| node.broken)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cells.contains_key(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Force every cell and check the edges of the finished nodes
    fn finish(self) -> Result<Self> {
        let mut errors = Vec::new();

        for name in &self.base.order {
            if let Err(e) = self.lookup(name) {
                errors.push(e);
            }
        }

        for (name, entry) in self.entries() {
            let Some(node) = entry.node() else { continue };
            for dep in &node.dependencies {
                if !self.contains(&dep.name) {
                    errors.push(
                        PlanError::unresolved(dep.name.as_str()).in_package(name, Field::Dependencies),
                    );
                }
            }
        }

        match PlanError::aggregate(errors) {
            Some(err) => {
                warn!("Build plan failed: {}", err);
                Err(err)
            }
            None => Ok(self),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries().collect::<Vec<_>>())
            .field("overrides", &self.overrides)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`Registry`] from locked packages
pub struct RegistryBuilder<'a> {
    env: &'a TargetEnvironment,
    config: PlanConfig,
    wheel_tags: &'a dyn WheelTagSelector,
    overrides: Overrides,
}

impl<'a> RegistryBuilder<'a> {
    /// Default configuration, [`EnvironmentTags`], no overrides
    pub fn new(env: &'a TargetEnvironment) -> Self {
        Self {
            env,
            config: PlanConfig::default(),
            wheel_tags: &EnvironmentTags,
            overrides: Overrides::new(),
        }
    }

    pub fn config(mut self, config: PlanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn wheel_tags(mut self, wheel_tags: &'a dyn WheelTagSelector) -> Self {
        self.wheel_tags = wheel_tags;
        self
    }

    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Build the default entries, then the final fixed point
    ///
    /// An unparsable interpreter version fails the whole build up front.
    pub fn build(self, packages: &[LockedPackage]) -> Result<Registry> {
        if let Err(e) = self.env.interpreter_version() {
            warn!("Target interpreter version is invalid: {}", e);
            return Err(e);
        }

        let base = self.build_base(packages);

        for name in self.overrides.names() {
            if !base.contains(name) {
                warn!("Override registered for '{}', which is not in the lock file", name);
            }
        }

        let registry = Registry::new(base, self.overrides).finish()?;

        let filtered = registry.entries().filter(|(_, e)| e.is_filtered()).count();
        info!(
            "Planned {} packages ({} filtered, {} broken)",
            registry.len(),
            filtered,
            registry.broken().len()
        );

        Ok(registry)
    }

    fn build_base(&self, packages: &[LockedPackage]) -> BaseRegistry {
        let known: BTreeSet<String> = packages.iter().map(LockedPackage::key).collect();
        let selector = ArtifactSelector::new(&self.config, self.wheel_tags);

        let mut entries = BTreeMap::new();
        let mut order = Vec::new();

        for package in packages {
            let key = package.key();
            if entries.contains_key(&key) {
                warn!("Duplicate lock entry for {}, keeping the first", key);
                continue;
            }

            let entry = self.default_entry(package, &known, &selector);
            order.push(key.clone());
            entries.insert(key, entry);
        }

        BaseRegistry { entries, order }
    }

    fn default_entry(
        &self,
        package: &LockedPackage,
        known: &BTreeSet<String>,
        selector: &ArtifactSelector<'_>,
    ) -> Result<Entry> {
        let name = package.key();
        let env = self.env;

        let active = marker::evaluate_optional(package.marker.as_deref(), env)
            .map_err(|e| e.in_package(&name, Field::Marker))?;
        if !active {
            debug!("{} {} filtered by marker", name, package.version);
            return Ok(Entry::Filtered);
        }

        let mut errors = Vec::new();

        let source = PackageSource::from_raw(package.source.as_ref())
            .map_err(|e| errors.push(e.in_package(&name, Field::Source)))
            .ok();

        let broken = match constraint::satisfies(env.python_full_version(), &package.python_versions) {
            Ok(ok) => !ok,
            Err(e) => {
                errors.push(e.in_package(&name, Field::PythonVersions));
                false
            }
        };
        if broken {
            warn!(
                "{} {} requires python {}, marking broken",
                name, package.version, package.python_versions
            );
        }

        let artifact = source.as_ref().and_then(|source| {
            let result = match source.location() {
                Some(location) => Ok(SelectedArtifact::from_location(
                    location,
                    package.files.first().map(|f| f.hash.clone()).unwrap_or_default(),
                )),
                None => selector.select(&name, &package.version, &package.files, env),
            };
            result
                .map_err(|e| errors.push(e.in_package(&name, Field::Files)))
                .ok()
        });

        let dependencies = self.collect_dependencies(package, &name, known, &mut errors);

        if let Some(err) = PlanError::aggregate(errors) {
            return Err(err);
        }

        // Both are present whenever no error was recorded.
        let (Some(source), Some(artifact)) = (source, artifact) else {
            return Err(PlanError::NoArtifact {
                name: name.clone(),
                version: package.version.clone(),
            }
            .in_package(&name, Field::Files));
        };

        Ok(Entry::Installable(BuildNode {
            requirements: platform::resolve(&artifact.platform_tag),
            name,
            version: package.version.clone(),
            source,
            artifact,
            dependencies,
            broken,
            python_versions: package.python_versions.clone(),
        }))
    }

    fn collect_dependencies(
        &self,
        package: &LockedPackage,
        name: &str,
        known: &BTreeSet<String>,
        errors: &mut Vec<PlanError>,
    ) -> Vec<DependencyRef> {
        let mut dependencies: Vec<DependencyRef> = Vec::new();

        for (dep_name, spec) in &package.dependencies {
            let markers = spec.markers();
            let mut active = markers.is_empty() || markers.iter().any(|t| t.trim().is_empty());
            let mut extras = Vec::new();
            for text in markers.into_iter().filter(|t| !t.trim().is_empty()) {
                match Marker::parse(text) {
                    Ok(parsed) => {
                        active |= parsed.evaluate(self.env);
                        extras.extend(marker::referenced_extras(&parsed));
                    }
                    Err(e) => errors.push(e.in_package(name, Field::Dependencies)),
                }
            }
            if !active {
                if extras.is_empty() {
                    debug!("{}: edge to {} inactive", name, dep_name);
                } else {
                    debug!(
                        "{}: edge to {} inactive, needs extra {}",
                        name,
                        dep_name,
                        extras.join(" or ")
                    );
                }
                continue;
            }

            let dep = DependencyRef::new(dep_name);
            if !known.contains(&dep.name) {
                errors.push(PlanError::unresolved(dep_name.as_str()).in_package(name, Field::Dependencies));
                continue;
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        dependencies.sort();
        dependencies
    }
}

/// Build with the default configuration and wheel tag policy
pub fn build(
    packages: &[LockedPackage],
    overrides: Overrides,
    env: &TargetEnvironment,
) -> Result<Registry> {
    RegistryBuilder::new(env).overrides(overrides).build(packages)
}
