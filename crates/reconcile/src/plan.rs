//! Plan model - ordered actions, advisories, and action grouping

use crate::types::{BackendId, PackageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of change an action makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Install,
    Remove,
    /// Pin an installed dependency as explicit without reinstalling
    MarkExplicit,
    /// Demote an explicit package to a dependency without removing it
    MarkImplicit,
}

impl ActionKind {
    /// Batch group this kind belongs to
    pub fn group(self) -> GroupKind {
        match self {
            Self::Install => GroupKind::Install,
            Self::Remove => GroupKind::Remove,
            Self::MarkExplicit | Self::MarkImplicit => GroupKind::Metadata,
        }
    }

    /// Whether this kind mutates package contents (not just metadata)
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Remove)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::MarkExplicit => "mark explicit",
            Self::MarkImplicit => "mark implicit",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Batch categories used by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupKind {
    Install,
    Remove,
    Metadata,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Metadata => "metadata",
        };
        f.write_str(s)
    }
}

/// A single planned change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub package: PackageRef,
    /// Human-readable justification for reporting
    pub reason: String,
}

impl Action {
    pub fn new(kind: ActionKind, package: PackageRef, reason: impl Into<String>) -> Self {
        Self {
            kind,
            package,
            reason: reason.into(),
        }
    }

    pub fn backend(&self) -> &BackendId {
        &self.package.backend
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.package)
    }
}

/// Report-only findings that are not actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Advisory {
    /// Explicitly installed but not declared anywhere
    Untracked { package: PackageRef },
    /// Backend could not be queried or lost connectivity
    BackendUnavailable { backend: BackendId, reason: String },
    /// Backend lacks the capability an action needed
    Unsupported { action: Action, capability: String },
    /// Action reported applied but the re-queried state still differs
    NotConverged { action: Action },
}

impl Advisory {
    pub fn backend(&self) -> &BackendId {
        match self {
            Self::Untracked { package } => &package.backend,
            Self::BackendUnavailable { backend, .. } => backend,
            Self::Unsupported { action, .. } | Self::NotConverged { action } => action.backend(),
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untracked { package } => write!(f, "untracked: {package}"),
            Self::BackendUnavailable { backend, reason } => {
                write!(f, "backend '{backend}' unavailable: {reason}")
            }
            Self::Unsupported { action, capability } => {
                write!(f, "{action}: backend does not support {capability}")
            }
            Self::NotConverged { action } => write!(f, "not converged: {action}"),
        }
    }
}

/// A run of consecutive actions sharing backend and group kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroup {
    pub backend: BackendId,
    pub kind: GroupKind,
    /// Indices into [`Plan::actions`]
    pub indices: Vec<usize>,
}

/// Ordered actions plus advisories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub advisories: Vec<Advisory>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn advise(&mut self, advisory: Advisory) {
        self.advisories.push(advisory);
    }

    /// Check if plan has no actions (advisories may still be present)
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Backends that have at least one action, in plan order
    pub fn backends(&self) -> Vec<BackendId> {
        let mut seen = BTreeSet::new();
        self.actions
            .iter()
            .filter(|a| seen.insert(a.backend().clone()))
            .map(|a| a.backend().clone())
            .collect()
    }

    /// Actions that belong to one backend, with their plan indices
    pub fn actions_for<'a>(
        &'a self,
        backend: &'a BackendId,
    ) -> impl Iterator<Item = (usize, &'a Action)> + 'a {
        self.actions
            .iter()
            .enumerate()
            .filter(move |(_, a)| a.backend() == backend)
    }

    /// Split actions into batches: consecutive actions with the same
    /// backend and group kind form one group.
    pub fn groups(&self) -> Vec<ActionGroup> {
        let mut groups: Vec<ActionGroup> = Vec::new();
        for (index, action) in self.actions.iter().enumerate() {
            let kind = action.kind.group();
            match groups.last_mut() {
                Some(g) if g.backend == *action.backend() && g.kind == kind => {
                    g.indices.push(index);
                }
                _ => groups.push(ActionGroup {
                    backend: action.backend().clone(),
                    kind,
                    indices: vec![index],
                }),
            }
        }
        groups
    }

    /// Count actions per kind
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Filter plan to only include actions matching a predicate.
    /// Advisories are kept for the backends that remain.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&Action) -> bool,
    {
        let actions: Vec<Action> = self.actions.into_iter().filter(|a| predicate(a)).collect();
        Self {
            actions,
            advisories: self.advisories,
        }
    }

    /// Filter plan to only include actions matching a target pattern
    ///
    /// Target format: "backend" or "backend.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (backend, name) = parse_target(t);
                let mut plan =
                    self.filter(|a| matches_filter(a, backend.as_deref(), name.as_deref()));
                if let Some(b) = backend {
                    plan.advisories.retain(|adv| adv.backend().as_str() == b);
                }
                plan
            }
        }
    }
}

/// Parse a target string like "backend.name" into (backend, name)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    match target.split_once('.') {
        None => (Some(target.to_string()), None),
        Some((backend, name)) if !backend.is_empty() && !name.contains('.') => {
            (Some(backend.to_string()), Some(name.to_string()))
        }
        Some(_) => (None, Some(target.to_string())),
    }
}

fn matches_filter(action: &Action, backend: Option<&str>, name: Option<&str>) -> bool {
    if let Some(b) = backend
        && action.backend().as_str() != b
    {
        return false;
    }

    if let Some(n) = name
        && action.package.name != n
    {
        return false;
    }

    true
}
