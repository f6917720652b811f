//! Diff engine - computes a plan from desired and actual state
//!
//! `diff` is a pure function: the same inputs always produce the same
//! actions in the same order. Backends are visited in id order and packages
//! in name order, so plans are stable across runs.

use crate::error::Result;
use crate::plan::{Action, ActionKind, Advisory, Plan};
use crate::types::{
    ApplyOrder, BackendId, BackendSnapshot, DesiredBackend, DesiredState, PackageRef, SystemState,
};
use std::collections::BTreeSet;

/// Knobs that change which actions the diff produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Emit `MarkImplicit` for untracked packages on backends that can mark
    pub demote_untracked: bool,
}

/// Compute the plan converging `actual` towards `desired`
pub fn diff(desired: &DesiredState, actual: &SystemState) -> Result<Plan> {
    diff_with(desired, actual, DiffOptions::default())
}

/// Compute a plan with explicit options
///
/// Fails with `ConflictingDesiredState` (and produces no plan) when a
/// package is declared both explicit and excluded.
pub fn diff_with(desired: &DesiredState, actual: &SystemState, opts: DiffOptions) -> Result<Plan> {
    desired.validate()?;

    let mut plan = Plan::new();
    let empty = DesiredBackend::default();

    for (backend, reason) in actual.unavailable() {
        plan.advise(Advisory::BackendUnavailable {
            backend: backend.clone(),
            reason: reason.clone(),
        });
    }

    let backends: BTreeSet<&BackendId> = desired
        .backends()
        .map(|(id, _)| id)
        .chain(actual.snapshots().map(|(id, _)| id))
        .collect();

    for backend in backends {
        if actual.is_unavailable(backend) {
            continue;
        }
        let wanted = desired.backend(backend).unwrap_or(&empty);
        let Some(snapshot) = actual.snapshot(backend) else {
            if !wanted.is_empty() {
                log::warn!("No snapshot for backend '{backend}', skipping");
                plan.advise(Advisory::BackendUnavailable {
                    backend: backend.clone(),
                    reason: "no snapshot".to_string(),
                });
            }
            continue;
        };

        diff_backend(wanted, snapshot, opts, &mut plan);
    }

    log::debug!(
        "Diff produced {} actions and {} advisories",
        plan.actions.len(),
        plan.advisories.len()
    );
    Ok(plan)
}

/// Diff a single backend, appending its actions in backend order
fn diff_backend(
    wanted: &DesiredBackend,
    snapshot: &BackendSnapshot,
    opts: DiffOptions,
    plan: &mut Plan,
) {
    let caps = snapshot.capabilities();

    let installs: Vec<Action> = wanted
        .explicit
        .iter()
        .filter(|p| !snapshot.is_installed(p))
        .map(|p| Action::new(ActionKind::Install, p.clone(), "declared explicit, not installed"))
        .collect();

    let pins: Vec<Action> = wanted
        .explicit
        .iter()
        .filter(|p| snapshot.is_installed(p) && !snapshot.is_explicit(p))
        .map(|p| {
            Action::new(
                ActionKind::MarkExplicit,
                p.clone(),
                "installed as a dependency, declared explicit",
            )
        })
        .collect();

    let removals: Vec<Action> = wanted
        .excluded
        .iter()
        .filter(|p| snapshot.is_installed(p))
        .map(|p| Action::new(ActionKind::Remove, p.clone(), "declared excluded"))
        .collect();

    let untracked: Vec<&PackageRef> = snapshot
        .explicit()
        .iter()
        .filter(|p| {
            !wanted.explicit.contains(*p)
                && !wanted.excluded.contains(*p)
                && !wanted.ignored.contains(&p.name)
        })
        .collect();

    let demotions: Vec<Action> = if opts.demote_untracked && caps.mark {
        untracked
            .iter()
            .map(|p| Action::new(ActionKind::MarkImplicit, (*p).clone(), "untracked"))
            .collect()
    } else {
        Vec::new()
    };

    match caps.order {
        ApplyOrder::InstallsFirst => {
            plan.actions.extend(installs);
            plan.actions.extend(pins);
            plan.actions.extend(removals);
        }
        ApplyOrder::RemovesFirst => {
            plan.actions.extend(removals);
            plan.actions.extend(installs);
            plan.actions.extend(pins);
        }
    }
    plan.actions.extend(demotions);

    for package in untracked {
        plan.advise(Advisory::Untracked {
            package: package.clone(),
        });
    }
}
