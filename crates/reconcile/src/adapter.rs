//! Backend adapter trait
//!
//! An adapter is a uniform handle on one package manager. The engine never
//! inspects concrete adapter types; everything goes through [`Backend`].

use crate::context::CallBudget;
use crate::error::{Error, Result};
use crate::types::{BackendId, Capabilities, PackageRef};
use std::collections::BTreeSet;
use std::time::Duration;

/// Per-package outcome of a batched mutation
///
/// Every package handed to the adapter must end up in exactly one of
/// `succeeded`, `failed` or `cancelled`, unless `fault` is set, in which
/// case packages not listed were never attempted.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<PackageRef>,
    /// Failed packages with the backend's message
    pub failed: Vec<(PackageRef, String)>,
    /// Adapter-level fault that stopped the batch (connectivity lost,
    /// timeout, binary gone)
    pub fault: Option<Error>,
    /// Packages not started because the call was cancelled
    pub cancelled: Vec<PackageRef>,
}

impl BatchOutcome {
    /// Outcome where every package succeeded
    pub fn all_ok(packages: &[PackageRef]) -> Self {
        Self {
            succeeded: packages.to_vec(),
            ..Self::default()
        }
    }

    /// Outcome where the whole batch hit an adapter fault
    pub fn faulted(fault: Error) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    /// Result for one package: `None` when it was not attempted
    pub fn outcome_for(&self, package: &PackageRef) -> Option<std::result::Result<(), &str>> {
        if self.succeeded.contains(package) {
            return Some(Ok(()));
        }
        self.failed
            .iter()
            .find(|(p, _)| p == package)
            .map(|(_, msg)| Err(msg.as_str()))
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.fault.is_none() && self.cancelled.is_empty()
    }
}

/// Uniform interface to a package manager
///
/// Implementations must be idempotent: installing an installed package or
/// removing an absent one is a success. Queries honour the supplied
/// timeout. Mutations share one [`CallBudget`] across the whole call: no
/// package is started once it is cancelled, and packages left when its
/// deadline passes are reported through a `BackendTimeout` fault.
pub trait Backend: Send + Sync {
    /// Identifier used in package refs and config
    fn id(&self) -> &BackendId;

    fn capabilities(&self) -> Capabilities;

    /// Check if the package manager can be reached at all
    fn is_available(&self) -> bool;

    /// Everything installed, including dependencies
    fn list_installed(&self, timeout: Duration) -> Result<BTreeSet<PackageRef>>;

    /// Packages the user requested; empty without explicit tracking
    fn list_explicit(&self, timeout: Duration) -> Result<BTreeSet<PackageRef>>;

    fn install(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome>;

    fn remove(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome>;

    /// Flip packages to explicit without reinstalling
    fn mark_explicit(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        let _ = (packages, budget);
        Err(Error::Unsupported {
            backend: self.id().clone(),
            capability: "mark-explicit",
        })
    }

    /// Flip packages to dependencies without removing
    fn mark_implicit(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        let _ = (packages, budget);
        Err(Error::Unsupported {
            backend: self.id().clone(),
            capability: "mark-implicit",
        })
    }
}

/// Boxed backend for dynamic dispatch
pub type BoxedBackend = Box<dyn Backend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_for() {
        let git = PackageRef::new("pacman", "git");
        let vim = PackageRef::new("pacman", "vim");
        let nano = PackageRef::new("pacman", "nano");
        let outcome = BatchOutcome {
            succeeded: vec![git.clone()],
            failed: vec![(vim.clone(), "target not found".into())],
            fault: None,
            cancelled: Vec::new(),
        };

        assert_eq!(outcome.outcome_for(&git), Some(Ok(())));
        assert_eq!(outcome.outcome_for(&vim), Some(Err("target not found")));
        assert_eq!(outcome.outcome_for(&nano), None);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_cancelled_packages_are_not_success() {
        let git = PackageRef::new("pacman", "git");
        let outcome = BatchOutcome {
            cancelled: vec![git.clone()],
            ..BatchOutcome::default()
        };

        assert_eq!(outcome.outcome_for(&git), None);
        assert!(!outcome.is_success());
    }
}
