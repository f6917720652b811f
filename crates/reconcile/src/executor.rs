//! Plan executor - applies a plan through backend adapters
//!
//! Each backend gets its own worker; backends run in parallel while the
//! batches of one backend run strictly in plan order. Workers write their
//! outcomes into a per-backend fragment, merged once all workers are done.

use crate::adapter::{Backend, BatchOutcome, BoxedBackend};
use crate::context::{
    CallBudget, CancelToken, ConfirmCallback, ConfirmRequest, ConfirmScope, ProgressCallback,
};
use crate::error::{Error, Result};
use crate::plan::{ActionGroup, ActionKind, Advisory, GroupKind, Plan};
use crate::report::{ActionOutcome, ActionState, ReportEntry, ResultReport};
use crate::types::{BackendId, Capabilities, PackageRef};
use rayon::prelude::*;
use std::time::Duration;

/// When to ask for confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfirmPolicy {
    /// Proceed without asking (`--yes`)
    Never,
    /// One prompt for the whole plan
    #[default]
    Plan,
    /// One prompt per action group
    PerGroup,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't make changes, mark everything skipped
    pub dry_run: bool,
    pub confirm: ConfirmPolicy,
    /// Number of backends processed in parallel
    pub jobs: usize,
    /// Budget for each mutating adapter call, shared by all its packages
    pub timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            confirm: ConfirmPolicy::Plan,
            jobs: 4,
            timeout: Duration::from_secs(1800),
        }
    }
}

/// Execute a plan with the given options and callbacks
///
/// Every action of the plan ends up in the report with a final outcome.
/// Per-package failures never stop other actions; an adapter fault fails
/// the remaining actions of that backend only.
pub fn execute(
    plan: &Plan,
    backends: &[BoxedBackend],
    opts: &ExecuteOptions,
    confirm: &mut dyn ConfirmCallback,
    progress: &dyn ProgressCallback,
    cancel: &CancelToken,
) -> Result<ResultReport> {
    let mut report = ResultReport {
        advisories: plan.advisories.clone(),
        ..ResultReport::default()
    };

    if plan.is_empty() {
        return Ok(report);
    }

    if opts.dry_run {
        report.entries = plan
            .actions
            .iter()
            .map(|action| ReportEntry {
                action: action.clone(),
                outcome: ActionOutcome::skipped("dry-run"),
            })
            .collect();
        return Ok(report);
    }

    let groups = plan.groups();
    let approved = confirm_groups(plan, &groups, opts.confirm, confirm)?;
    let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; plan.len()];

    let mut work: Vec<(BackendId, Vec<&ActionGroup>)> = Vec::new();
    for (group, ok) in groups.iter().zip(&approved) {
        if !*ok {
            for &i in &group.indices {
                let outcome = ActionOutcome::skipped("declined");
                progress.on_action_complete(&plan.actions[i], &outcome);
                outcomes[i] = Some(outcome);
            }
            continue;
        }
        match work.iter_mut().find(|(id, _)| *id == group.backend) {
            Some((_, batch)) => batch.push(group),
            None => work.push((group.backend.clone(), vec![group])),
        }
    }
    work.sort_by(|a, b| a.0.cmp(&b.0));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    let fragments: Vec<Result<Fragment>> = pool.install(|| {
        work.par_iter()
            .map(|(id, groups)| {
                let worker = BackendWorker {
                    id,
                    backend: backends
                        .iter()
                        .find(|b| b.id() == id)
                        .map(|b| b.as_ref() as &dyn Backend),
                    plan,
                    timeout: opts.timeout,
                    progress,
                    cancel,
                };
                worker.run(groups)
            })
            .collect()
    });

    for fragment in fragments {
        let fragment = fragment?;
        for (i, outcome) in fragment.outcomes {
            outcomes[i] = Some(outcome);
        }
        report.advisories.extend(fragment.advisories);
        report.cancelled |= fragment.cancelled;
    }

    if report.cancelled {
        log::warn!("Execution cancelled; remaining actions were not started");
    }

    report.entries = plan
        .actions
        .iter()
        .zip(outcomes)
        .map(|(action, outcome)| ReportEntry {
            action: action.clone(),
            outcome: outcome.unwrap_or_else(|| ActionOutcome::skipped("not executed")),
        })
        .collect();

    Ok(report)
}

/// Resolve confirmations up front, one flag per group
fn confirm_groups(
    plan: &Plan,
    groups: &[ActionGroup],
    policy: ConfirmPolicy,
    confirm: &mut dyn ConfirmCallback,
) -> Result<Vec<bool>> {
    match policy {
        ConfirmPolicy::Never => Ok(vec![true; groups.len()]),
        ConfirmPolicy::Plan => {
            let request = ConfirmRequest {
                prompt: format!("Apply {} change(s)?", plan.len()),
                scope: ConfirmScope::Plan,
                actions: plan.actions.iter().collect(),
            };
            let ok = confirm.confirm(&request)?;
            Ok(vec![ok; groups.len()])
        }
        ConfirmPolicy::PerGroup => groups
            .iter()
            .map(|group| {
                let request = ConfirmRequest {
                    prompt: group_prompt(group),
                    scope: ConfirmScope::Group {
                        backend: group.backend.clone(),
                        kind: group.kind,
                    },
                    actions: group.indices.iter().map(|&i| &plan.actions[i]).collect(),
                };
                confirm.confirm(&request)
            })
            .collect(),
    }
}

fn group_prompt(group: &ActionGroup) -> String {
    let verb = match group.kind {
        GroupKind::Install => "Install",
        GroupKind::Remove => "Remove",
        GroupKind::Metadata => "Change install reason of",
    };
    format!(
        "{verb} {} package(s) with {}?",
        group.indices.len(),
        group.backend
    )
}

/// Outcomes produced by one backend worker
#[derive(Debug, Default)]
struct Fragment {
    outcomes: Vec<(usize, ActionOutcome)>,
    advisories: Vec<Advisory>,
    cancelled: bool,
}

/// Applies the approved groups of a single backend, in order
struct BackendWorker<'a> {
    id: &'a BackendId,
    backend: Option<&'a dyn Backend>,
    plan: &'a Plan,
    timeout: Duration,
    progress: &'a dyn ProgressCallback,
    cancel: &'a CancelToken,
}

impl BackendWorker<'_> {
    fn run(&self, groups: &[&ActionGroup]) -> Result<Fragment> {
        let mut fragment = Fragment::default();
        let mut lost: Option<String> = None;

        for group in groups {
            for batch in split_by_kind(self.plan, &group.indices) {
                self.run_batch(&batch, &mut lost, &mut fragment)?;
            }
        }
        Ok(fragment)
    }

    fn run_batch(
        &self,
        indices: &[usize],
        lost: &mut Option<String>,
        fragment: &mut Fragment,
    ) -> Result<()> {
        let kind = self.plan.actions[indices[0]].kind;

        if let Some(reason) = lost.as_deref() {
            return self.finish_pending(indices, &ActionOutcome::failed(reason), fragment);
        }

        let Some(backend) = self.backend else {
            let err = Error::unavailable(self.id, "not configured");
            return self.finish_pending(indices, &ActionOutcome::failed(err), fragment);
        };

        if self.cancel.is_cancelled() {
            fragment.cancelled = true;
            return self.finish_pending(indices, &ActionOutcome::skipped("cancelled"), fragment);
        }

        if let Some(capability) = missing_capability(kind, backend.capabilities()) {
            return self.skip_unsupported(indices, capability, fragment);
        }

        let packages: Vec<PackageRef> = indices
            .iter()
            .map(|&i| self.plan.actions[i].package.clone())
            .collect();

        self.progress
            .on_group_start(self.id, kind.group(), packages.len());
        log::info!("{}: {kind} {} package(s)", self.id, packages.len());

        let budget = CallBudget::new(self.timeout, self.cancel.clone());
        let outcomes = match dispatch(backend, kind, &packages, &budget) {
            Ok(batch) => {
                if let Some(fault) = &batch.fault {
                    self.lose_backend(fault, lost, fragment);
                }
                if !batch.cancelled.is_empty() {
                    fragment.cancelled = true;
                }
                attribute(&batch, &packages)
            }
            Err(Error::Unsupported { capability, .. }) => {
                return self.skip_unsupported(indices, capability, fragment);
            }
            Err(e) => {
                if e.is_adapter_fault() {
                    self.lose_backend(&e, lost, fragment);
                }
                vec![ActionOutcome::failed(&e); packages.len()]
            }
        };

        for (&i, outcome) in indices.iter().zip(outcomes) {
            let mut state = ActionState::Pending;
            // Packages the adapter never started stay out of Applying
            if !matches!(outcome, ActionOutcome::Skipped { .. }) {
                state.advance(ActionState::Applying)?;
            }
            if let ActionOutcome::Failed { error } = &outcome {
                log::warn!("{}: {error}", self.plan.actions[i]);
            }
            state.advance(ActionState::Done(outcome.clone()))?;
            self.progress
                .on_action_complete(&self.plan.actions[i], &outcome);
            fragment.outcomes.push((i, outcome));
        }
        Ok(())
    }

    /// Skip actions the backend cannot perform, with an advisory each
    fn skip_unsupported(
        &self,
        indices: &[usize],
        capability: &str,
        fragment: &mut Fragment,
    ) -> Result<()> {
        log::info!("{}: {capability} not supported, skipping", self.id);
        for &i in indices {
            fragment.advisories.push(Advisory::Unsupported {
                action: self.plan.actions[i].clone(),
                capability: capability.to_string(),
            });
        }
        let outcome = ActionOutcome::skipped(format!("{capability} not supported"));
        self.finish_pending(indices, &outcome, fragment)
    }

    /// Finish actions that never reached the adapter
    fn finish_pending(
        &self,
        indices: &[usize],
        outcome: &ActionOutcome,
        fragment: &mut Fragment,
    ) -> Result<()> {
        for &i in indices {
            let mut state = ActionState::Pending;
            state.advance(ActionState::Done(outcome.clone()))?;
            self.progress
                .on_action_complete(&self.plan.actions[i], outcome);
            fragment.outcomes.push((i, outcome.clone()));
        }
        Ok(())
    }

    /// Record an adapter fault; later batches of this backend fail unattempted
    fn lose_backend(&self, fault: &Error, lost: &mut Option<String>, fragment: &mut Fragment) {
        let reason = match fault {
            Error::BackendUnavailable { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        log::warn!("Backend '{}' lost: {reason}", self.id);
        *lost = Some(Error::unavailable(self.id, reason.clone()).to_string());
        fragment.advisories.push(Advisory::BackendUnavailable {
            backend: self.id.clone(),
            reason,
        });
    }
}

/// Split a group into consecutive runs of the same action kind
fn split_by_kind(plan: &Plan, indices: &[usize]) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut last: Option<ActionKind> = None;
    for &i in indices {
        let kind = plan.actions[i].kind;
        match batches.last_mut() {
            Some(batch) if last == Some(kind) => batch.push(i),
            _ => batches.push(vec![i]),
        }
        last = Some(kind);
    }
    batches
}

fn missing_capability(kind: ActionKind, caps: Capabilities) -> Option<&'static str> {
    match kind {
        ActionKind::Install if !caps.install => Some("install"),
        ActionKind::Remove if !caps.remove => Some("remove"),
        ActionKind::MarkExplicit if !caps.mark => Some("mark-explicit"),
        ActionKind::MarkImplicit if !caps.mark => Some("mark-implicit"),
        _ => None,
    }
}

fn dispatch(
    backend: &dyn Backend,
    kind: ActionKind,
    packages: &[PackageRef],
    budget: &CallBudget,
) -> Result<BatchOutcome> {
    match kind {
        ActionKind::Install => backend.install(packages, budget),
        ActionKind::Remove => backend.remove(packages, budget),
        ActionKind::MarkExplicit => backend.mark_explicit(packages, budget),
        ActionKind::MarkImplicit => backend.mark_implicit(packages, budget),
    }
}

/// Map a batch outcome back onto the packages that were sent
fn attribute(batch: &BatchOutcome, packages: &[PackageRef]) -> Vec<ActionOutcome> {
    packages
        .iter()
        .map(|package| match batch.outcome_for(package) {
            Some(Ok(())) => ActionOutcome::Applied,
            Some(Err(message)) => ActionOutcome::failed(message),
            None if batch.cancelled.contains(package) => ActionOutcome::skipped("cancelled"),
            None => match &batch.fault {
                Some(fault) => ActionOutcome::failed(fault),
                None => ActionOutcome::failed("no result reported by backend"),
            },
        })
        .collect()
}
