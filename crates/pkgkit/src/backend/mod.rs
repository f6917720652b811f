//! Concrete package manager adapters.
//!
//! Every adapter implements [`reconcile::Backend`]. They share two
//! helpers: [`parse_package_lines`] for line-oriented list output and
//! [`apply_batch`] for batched mutations with per-package attribution.

pub mod brew;
pub mod command;
pub mod pacman;

use crate::error::{Error, Result};
use crate::retry::{LogCallback, RetryConfig, with_retry_within};
use reconcile::{BackendId, BatchOutcome, CallBudget, PackageRef};
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;

pub use brew::{BrewBackend, BrewKind};
pub use command::{CommandBackend, CommandSpec};
pub use pacman::{PacmanBackend, PacmanFlavor};

/// Parse one package per non-empty line.
///
/// With `pattern`, each line must match and the `name` group (and optional
/// `version` group) is taken from it. Without, the first whitespace token
/// is the name and the second the version.
pub fn parse_package_lines(
    backend: &BackendId,
    output: &str,
    pattern: Option<&Regex>,
) -> Result<BTreeSet<PackageRef>> {
    let mut packages = BTreeSet::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, version) = match pattern {
            Some(re) => {
                let caps = re
                    .captures(line)
                    .ok_or_else(|| Error::Parse(format!("line does not match list_regex: '{line}'")))?;
                let name = caps
                    .name("name")
                    .map(|m| m.as_str())
                    .ok_or_else(|| Error::Parse(format!("no package name in '{line}'")))?;
                (name, caps.name("version").map(|m| m.as_str()))
            }
            None => {
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some(name) => (name, parts.next()),
                    None => continue,
                }
            }
        };

        if name.is_empty() {
            return Err(Error::Parse(format!("empty package name in '{line}'")));
        }

        let mut package = PackageRef::new(backend, name);
        if let Some(version) = version {
            package = package.with_version(version);
        }
        packages.replace(package);
    }

    Ok(packages)
}

/// Run a mutation for `packages`, attributing the result to each package.
///
/// When `multi` is set the whole set goes through one call first; if that
/// fails for a reason other than an adapter fault, every package is re-run
/// alone to find out exactly which ones fail. Install and remove being
/// idempotent, re-running the successful ones is a no-op. An adapter fault
/// stops the batch and leaves the remaining packages unattempted.
///
/// All runs share `budget`: `run` gets the time left as its subprocess
/// deadline, and a spent budget ends the batch with a `BackendTimeout`
/// fault. Once the budget is cancelled no further package is started and
/// the rest are reported in `cancelled`.
pub fn apply_batch<F>(
    backend: &BackendId,
    operation: &str,
    packages: &[PackageRef],
    multi: bool,
    retry: &RetryConfig,
    budget: &CallBudget,
    mut run: F,
) -> BatchOutcome
where
    F: FnMut(&[PackageRef], Duration) -> Result<()>,
{
    if packages.is_empty() {
        return BatchOutcome::default();
    }
    let label = format!("{backend} {operation}");

    if multi && packages.len() > 1 {
        if budget.is_cancelled() {
            log::info!("{label}: cancelled before start");
            return BatchOutcome {
                cancelled: packages.to_vec(),
                ..BatchOutcome::default()
            };
        }
        match with_retry_within(retry, Some(&LogCallback), budget, &label, |left| {
            run(packages, left)
        }) {
            Ok(()) => return BatchOutcome::all_ok(packages),
            Err(e) if e.is_adapter_fault() => {
                return BatchOutcome::faulted(into_fault(e, backend, operation, budget));
            }
            Err(e) => {
                log::info!("{label}: batched run failed ({e}), retrying packages one by one");
            }
        }
    }

    let mut outcome = BatchOutcome::default();
    for (i, package) in packages.iter().enumerate() {
        if budget.is_cancelled() {
            log::info!("{label}: cancelled, {} package(s) not started", packages.len() - i);
            outcome.cancelled.extend_from_slice(&packages[i..]);
            break;
        }
        match with_retry_within(retry, Some(&LogCallback), budget, &label, |left| {
            run(std::slice::from_ref(package), left)
        }) {
            Ok(()) => outcome.succeeded.push(package.clone()),
            Err(e) if e.is_adapter_fault() => {
                outcome.fault = Some(into_fault(e, backend, operation, budget));
                break;
            }
            Err(e) => {
                log::warn!("{label} {} failed: {e}", package.name);
                outcome.failed.push((package.clone(), e.to_string()));
            }
        }
    }
    outcome
}

/// Convert an adapter fault, reporting timeouts against the whole budget
fn into_fault(
    error: Error,
    backend: &BackendId,
    operation: &str,
    budget: &CallBudget,
) -> reconcile::Error {
    let error = match error {
        Error::Timeout { command, .. } => Error::Timeout {
            command,
            timeout: budget.timeout(),
        },
        other => other,
    };
    error.into_backend_error(backend, operation)
}
