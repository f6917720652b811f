//! Reconciliation session - snapshot, diff, execute, verify
//!
//! A session owns the configured backends for one invocation. State is
//! never kept between sessions; the snapshot cache only avoids duplicate
//! queries within one run.

use crate::adapter::BoxedBackend;
use crate::context::{CancelToken, ConfirmCallback, ProgressCallback};
use crate::diff::{DiffOptions, diff_with};
use crate::error::Result;
use crate::executor::{ConfirmPolicy, ExecuteOptions, execute};
use crate::plan::{Advisory, Plan};
use crate::report::{ActionOutcome, ResultReport};
use crate::snapshot::SnapshotBuilder;
use crate::types::{BackendId, DesiredState, SystemState};
use std::collections::BTreeSet;
use std::time::Duration;

/// What the caller wants done with the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Build the plan, mark every action skipped
    Preview,
    /// Apply, asking for confirmation unless `assume_yes`
    Apply { assume_yes: bool },
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: Mode,
    /// Abort when any backend cannot be queried
    pub strict: bool,
    /// Confirm every action group instead of the whole plan
    pub paranoid: bool,
    pub query_timeout: Duration,
    pub apply_timeout: Duration,
    /// Backends processed in parallel
    pub jobs: usize,
    pub demote_untracked: bool,
    /// Re-query mutated backends after applying
    pub verify: bool,
    /// Restrict the plan to "backend" or "backend.name"
    pub target: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Preview,
            strict: false,
            paranoid: false,
            query_timeout: Duration::from_secs(120),
            apply_timeout: Duration::from_secs(1800),
            jobs: 4,
            demote_untracked: false,
            verify: true,
            target: None,
        }
    }
}

impl SessionOptions {
    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            demote_untracked: self.demote_untracked,
        }
    }

    fn execute_options(&self) -> ExecuteOptions {
        let confirm = match self.mode {
            Mode::Preview | Mode::Apply { assume_yes: true } => ConfirmPolicy::Never,
            Mode::Apply { assume_yes: false } if self.paranoid => ConfirmPolicy::PerGroup,
            Mode::Apply { assume_yes: false } => ConfirmPolicy::Plan,
        };
        ExecuteOptions {
            dry_run: self.mode == Mode::Preview,
            confirm,
            jobs: self.jobs,
            timeout: self.apply_timeout,
        }
    }
}

/// Top-level coordinator for one reconciliation
pub struct Session {
    backends: Vec<BoxedBackend>,
    options: SessionOptions,
    snapshots: SnapshotBuilder,
    cancel: CancelToken,
}

impl Session {
    pub fn new(backends: Vec<BoxedBackend>, options: SessionOptions) -> Self {
        let snapshots = SnapshotBuilder::new(options.query_timeout, options.jobs);
        Self {
            backends,
            options,
            snapshots,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. wired to SIGINT)
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn backends(&self) -> &[BoxedBackend] {
        &self.backends
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Query every backend
    pub fn snapshot(&self, progress: &dyn ProgressCallback) -> Result<SystemState> {
        self.snapshots.build(&self.backends, progress)
    }

    /// Snapshot and diff without executing
    pub fn plan(&self, desired: &DesiredState, progress: &dyn ProgressCallback) -> Result<Plan> {
        desired.validate()?;
        let state = self.snapshot(progress)?;
        let plan = diff_with(desired, &state, self.options.diff_options())?;
        Ok(plan.filter_by_target(self.options.target.as_deref()))
    }

    /// Run a full reconciliation and report every action's outcome
    ///
    /// Conflicting input and strict-mode backend failures abort before any
    /// mutation and are reported, not returned as errors.
    pub fn run(
        &self,
        desired: &DesiredState,
        confirm: &mut dyn ConfirmCallback,
        progress: &dyn ProgressCallback,
    ) -> Result<ResultReport> {
        if let Err(e) = desired.validate() {
            log::error!("{e}");
            return Ok(ResultReport::aborted(e.to_string(), Vec::new()));
        }

        if self.cancel.is_cancelled() {
            return Ok(ResultReport::aborted("cancelled before start", Vec::new()));
        }

        let state = self.snapshot(progress)?;

        if self.options.strict && !state.unavailable().is_empty() {
            let advisories = unavailable_advisories(&state);
            let names: Vec<&str> = state.unavailable().keys().map(BackendId::as_str).collect();
            let reason = format!("strict mode: unavailable backend(s): {}", names.join(", "));
            log::error!("{reason}");
            return Ok(ResultReport::aborted(reason, advisories));
        }

        let plan = diff_with(desired, &state, self.options.diff_options())?
            .filter_by_target(self.options.target.as_deref());
        log::info!(
            "Plan: {} action(s), {} advisory(ies)",
            plan.len(),
            plan.advisories.len()
        );

        let opts = self.options.execute_options();
        let mut report = execute(
            &plan,
            &self.backends,
            &opts,
            confirm,
            progress,
            &self.cancel,
        )?;

        let mutated: BTreeSet<BackendId> = report
            .entries
            .iter()
            .filter(|e| !matches!(e.outcome, ActionOutcome::Skipped { .. }))
            .map(|e| e.action.backend().clone())
            .collect();
        for backend in &mutated {
            self.snapshots.invalidate(backend);
        }

        if self.options.verify && !mutated.is_empty() {
            self.verify(desired, &mut report, progress)?;
        }

        Ok(report)
    }

    /// Re-query and flag applied actions that did not stick
    fn verify(
        &self,
        desired: &DesiredState,
        report: &mut ResultReport,
        progress: &dyn ProgressCallback,
    ) -> Result<()> {
        let state = self.snapshot(progress)?;
        let remaining = match diff_with(desired, &state, self.options.diff_options()) {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("Verification skipped: {e}");
                return Ok(());
            }
        };

        let not_converged: Vec<Advisory> = report
            .applied()
            .filter(|e| !state.is_unavailable(e.action.backend()))
            .filter(|e| remaining.actions.contains(&e.action))
            .map(|e| Advisory::NotConverged {
                action: e.action.clone(),
            })
            .collect();

        for advisory in &not_converged {
            log::warn!("{advisory}");
        }
        report.advisories.extend(not_converged);
        Ok(())
    }
}

fn unavailable_advisories(state: &SystemState) -> Vec<Advisory> {
    state
        .unavailable()
        .iter()
        .map(|(backend, reason)| Advisory::BackendUnavailable {
            backend: backend.clone(),
            reason: reason.clone(),
        })
        .collect()
}
