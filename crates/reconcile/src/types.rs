//! Core types: package references, desired state, actual state

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Tag identifying the adapter that owns a package
///
/// The set of backends is open: ids come from configuration
/// (e.g. "pacman", "aur", "brew", "fisher").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BackendId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&BackendId> for BackendId {
    fn from(id: &BackendId) -> Self {
        id.clone()
    }
}

/// A package owned by one backend
///
/// Identity is `(backend, name)`. Version and install hints are carried
/// along but never take part in equality, hashing or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRef {
    pub backend: BackendId,
    pub name: String,
    /// Version constraint from config, or installed version from a query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Extra arguments placed after the name in install commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    /// Replaces the name in install commands (URL, path, `repo/name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PackageRef {
    pub fn new(backend: impl Into<BackendId>, name: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            name: name.into(),
            version: None,
            extra: None,
            source: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Argument handed to install commands for this package
    pub fn install_arg(&self) -> String {
        if let Some(source) = &self.source {
            return source.clone();
        }
        match &self.extra {
            Some(extra) => format!("{} {}", self.name, extra),
            None => self.name.clone(),
        }
    }
}

impl PartialEq for PackageRef {
    fn eq(&self, other: &Self) -> bool {
        self.backend == other.backend && self.name == other.name
    }
}

impl Eq for PackageRef {}

impl Hash for PackageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.backend.hash(state);
        self.name.hash(state);
    }
}

impl PartialOrd for PackageRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.backend
            .cmp(&other.backend)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backend, self.name)
    }
}

/// Relative order of install and remove batches within one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyOrder {
    /// Install before removing (conservative default)
    #[default]
    InstallsFirst,
    /// Remove before installing (e.g. replacing conflicting packages)
    RemovesFirst,
}

/// What a backend adapter can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Backend distinguishes user-requested packages from dependencies
    pub explicit_tracking: bool,
    pub install: bool,
    pub remove: bool,
    /// Backend can flip the explicit/dependency flag without reinstalling
    pub mark: bool,
    pub order: ApplyOrder,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            explicit_tracking: false,
            install: true,
            remove: true,
            mark: false,
            order: ApplyOrder::InstallsFirst,
        }
    }
}

/// Desired packages for one backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredBackend {
    /// Must be present and explicitly installed
    pub explicit: BTreeSet<PackageRef>,
    /// Must be absent regardless of dependency status
    pub excluded: BTreeSet<PackageRef>,
    /// Never reported as untracked
    pub ignored: BTreeSet<String>,
}

impl DesiredBackend {
    /// Packages declared both explicit and excluded
    pub fn conflicts(&self) -> impl Iterator<Item = &PackageRef> {
        self.explicit.intersection(&self.excluded)
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.excluded.is_empty() && self.ignored.is_empty()
    }
}

/// Normalized declarative configuration, keyed by backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    backends: BTreeMap<BackendId, DesiredBackend>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a package explicit. A later declaration replaces the hints
    /// (version, extra, source) of an earlier one.
    pub fn require(&mut self, package: PackageRef) -> &mut Self {
        self.backend_mut(&package.backend.clone())
            .explicit
            .replace(package);
        self
    }

    /// Declare a package excluded
    pub fn exclude(&mut self, package: PackageRef) -> &mut Self {
        self.backend_mut(&package.backend.clone())
            .excluded
            .replace(package);
        self
    }

    /// Never report `name` as untracked on `backend`
    pub fn ignore(&mut self, backend: &BackendId, name: impl Into<String>) -> &mut Self {
        self.backend_mut(backend).ignored.insert(name.into());
        self
    }

    /// Drop a previously required package; returns whether it was declared
    pub fn forget(&mut self, backend: &BackendId, name: &str) -> bool {
        let key = PackageRef::new(backend, name);
        self.backends
            .get_mut(backend)
            .is_some_and(|b| b.explicit.remove(&key))
    }

    /// Get (or create) the declarations for a backend
    pub fn backend_mut(&mut self, backend: &BackendId) -> &mut DesiredBackend {
        self.backends.entry(backend.clone()).or_default()
    }

    pub fn backend(&self, backend: &BackendId) -> Option<&DesiredBackend> {
        self.backends.get(backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = (&BackendId, &DesiredBackend)> {
        self.backends.iter()
    }

    /// Keep only backends matching the predicate
    pub fn retain_backends<F>(&mut self, mut keep: F)
    where
        F: FnMut(&BackendId) -> bool,
    {
        self.backends.retain(|id, _| keep(id));
    }

    /// All packages declared both explicit and excluded, in order
    pub fn conflicts(&self) -> Vec<PackageRef> {
        self.backends
            .values()
            .flat_map(DesiredBackend::conflicts)
            .cloned()
            .collect()
    }

    /// Check the explicit/excluded invariant
    pub fn validate(&self) -> Result<()> {
        let packages = self.conflicts();
        if packages.is_empty() {
            Ok(())
        } else {
            Err(Error::ConflictingDesiredState { packages })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.values().all(DesiredBackend::is_empty)
    }
}

/// Actual state of one backend, as queried during this session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSnapshot {
    installed: BTreeSet<PackageRef>,
    explicit: BTreeSet<PackageRef>,
    capabilities: Capabilities,
}

impl BackendSnapshot {
    /// Build a snapshot, enforcing `explicit ⊆ installed`.
    ///
    /// Backends without explicit tracking report every installed package
    /// as explicit.
    pub fn new(
        backend: &BackendId,
        installed: BTreeSet<PackageRef>,
        explicit: BTreeSet<PackageRef>,
        capabilities: Capabilities,
    ) -> Result<Self> {
        let explicit = if capabilities.explicit_tracking {
            explicit
        } else {
            installed.clone()
        };

        if let Some(stray) = explicit.iter().find(|p| !installed.contains(*p)) {
            return Err(Error::BackendQueryError {
                backend: backend.clone(),
                message: format!("'{}' listed as explicit but not installed", stray.name),
            });
        }

        Ok(Self {
            installed,
            explicit,
            capabilities,
        })
    }

    pub fn installed(&self) -> &BTreeSet<PackageRef> {
        &self.installed
    }

    pub fn explicit(&self) -> &BTreeSet<PackageRef> {
        &self.explicit
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn is_installed(&self, package: &PackageRef) -> bool {
        self.installed.contains(package)
    }

    pub fn is_explicit(&self, package: &PackageRef) -> bool {
        self.explicit.contains(package)
    }
}

/// Actual state of every configured backend
///
/// Backends whose query failed are recorded as unavailable and excluded
/// from diffing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    snapshots: BTreeMap<BackendId, BackendSnapshot>,
    unavailable: BTreeMap<BackendId, String>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, backend: BackendId, snapshot: BackendSnapshot) {
        self.unavailable.remove(&backend);
        self.snapshots.insert(backend, snapshot);
    }

    pub fn mark_unavailable(&mut self, backend: BackendId, reason: impl Into<String>) {
        self.snapshots.remove(&backend);
        self.unavailable.insert(backend, reason.into());
    }

    pub fn snapshot(&self, backend: &BackendId) -> Option<&BackendSnapshot> {
        self.snapshots.get(backend)
    }

    pub fn snapshots(&self) -> impl Iterator<Item = (&BackendId, &BackendSnapshot)> {
        self.snapshots.iter()
    }

    /// Backends that could not be queried, with the reason
    pub fn unavailable(&self) -> &BTreeMap<BackendId, String> {
        &self.unavailable
    }

    pub fn is_unavailable(&self, backend: &BackendId) -> bool {
        self.unavailable.contains_key(backend)
    }

    /// Whether the backend was queried at all (successfully or not)
    pub fn knows(&self, backend: &BackendId) -> bool {
        self.snapshots.contains_key(backend) || self.unavailable.contains_key(backend)
    }
}
