//! Result report - per-action outcomes and overall status

use crate::error::{Error, Result};
use crate::plan::{Action, ActionKind, Advisory};
use serde::{Deserialize, Serialize};

/// Final outcome of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ActionOutcome {
    Applied,
    Skipped { reason: String },
    Failed { error: String },
}

impl ActionOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    /// Check if the outcome represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Lifecycle of one action inside the executor
///
/// `Pending -> Applying -> {Applied | Failed}`; `Skipped` and `Failed`
/// are also reachable from `Pending` (dry-run, declined, cancelled,
/// backend lost before the call).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Applying,
    Done(ActionOutcome),
}

impl ActionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Done(ActionOutcome::Applied) => "applied",
            Self::Done(ActionOutcome::Skipped { .. }) => "skipped",
            Self::Done(ActionOutcome::Failed { .. }) => "failed",
        }
    }

    /// Move to `next`, rejecting illegal edges
    pub fn advance(&mut self, next: Self) -> Result<()> {
        let legal = matches!(
            (&*self, &next),
            (Self::Pending, Self::Applying)
                | (
                    Self::Pending,
                    Self::Done(ActionOutcome::Skipped { .. } | ActionOutcome::Failed { .. })
                )
                | (
                    Self::Applying,
                    Self::Done(ActionOutcome::Applied | ActionOutcome::Failed { .. })
                )
        );
        if !legal {
            return Err(Error::InvalidTransition {
                from: self.name(),
                to: next.name(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Final outcome, if the action has finished
    pub fn outcome(&self) -> Option<&ActionOutcome> {
        match self {
            Self::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Overall status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    FullySucceeded,
    PartiallyFailed,
    Aborted,
}

impl OverallStatus {
    /// Conventional process exit code
    pub fn exit_code(self) -> u8 {
        match self {
            Self::FullySucceeded => 0,
            Self::PartiallyFailed => 1,
            Self::Aborted => 2,
        }
    }
}

/// One action with its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub action: Action,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

/// Counts of outcomes by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub installed: usize,
    pub removed: usize,
    pub marked: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReportSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.installed + self.removed + self.marked
    }

    /// Total number of actions processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &Self) {
        self.installed += other.installed;
        self.removed += other.removed;
        self.marked += other.marked;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Add an outcome to the summary
    pub fn add(&mut self, kind: ActionKind, outcome: &ActionOutcome) {
        match (outcome, kind) {
            (ActionOutcome::Skipped { .. }, _) => self.skipped += 1,
            (ActionOutcome::Failed { .. }, _) => self.failed += 1,
            (ActionOutcome::Applied, ActionKind::Install) => self.installed += 1,
            (ActionOutcome::Applied, ActionKind::Remove) => self.removed += 1,
            (ActionOutcome::Applied, ActionKind::MarkExplicit | ActionKind::MarkImplicit) => {
                self.marked += 1;
            }
        }
    }
}

/// Everything a session produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultReport {
    /// Every planned action with its final outcome, in plan order
    pub entries: Vec<ReportEntry>,
    pub advisories: Vec<Advisory>,
    /// Set when the session stopped before mutating anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Set when cancellation stopped the executor early
    #[serde(default)]
    pub cancelled: bool,
}

impl ResultReport {
    /// Report for a session that stopped before any mutation
    pub fn aborted(reason: impl Into<String>, advisories: Vec<Advisory>) -> Self {
        Self {
            abort_reason: Some(reason.into()),
            advisories,
            ..Self::default()
        }
    }

    /// Overall status
    ///
    /// Aborted when stopped before mutation, or cancelled without
    /// failures. Partially failed when any action failed or any backend
    /// was unavailable.
    pub fn status(&self) -> OverallStatus {
        if self.abort_reason.is_some() {
            return OverallStatus::Aborted;
        }

        let failed = self.entries.iter().any(|e| !e.outcome.is_success());
        if failed {
            return OverallStatus::PartiallyFailed;
        }
        if self.cancelled {
            return OverallStatus::Aborted;
        }

        let degraded = self
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::BackendUnavailable { .. }));
        if degraded {
            OverallStatus::PartiallyFailed
        } else {
            OverallStatus::FullySucceeded
        }
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for entry in &self.entries {
            summary.add(entry.action.kind, &entry.outcome);
        }
        summary
    }

    /// Advisories of the `Untracked` kind
    pub fn untracked(&self) -> impl Iterator<Item = &Advisory> {
        self.advisories
            .iter()
            .filter(|a| matches!(a, Advisory::Untracked { .. }))
    }

    /// Entries whose action was applied
    pub fn applied(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome.is_applied())
    }

    pub fn outcome_of(&self, action: &Action) -> Option<&ActionOutcome> {
        self.entries
            .iter()
            .find(|e| e.action == *action)
            .map(|e| &e.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendId, PackageRef};

    fn entry(name: &str, outcome: ActionOutcome) -> ReportEntry {
        ReportEntry {
            action: Action::new(ActionKind::Install, PackageRef::new("pacman", name), "test"),
            outcome,
        }
    }

    #[test]
    fn test_state_machine_edges() {
        let mut state = ActionState::Pending;
        state.advance(ActionState::Applying).unwrap();
        state
            .advance(ActionState::Done(ActionOutcome::Applied))
            .unwrap();
        assert_eq!(state.outcome(), Some(&ActionOutcome::Applied));

        let err = state.advance(ActionState::Applying).unwrap_err();
        assert_eq!(err.to_string(), "invalid action transition: applied -> applying");

        let mut skipped = ActionState::Pending;
        skipped
            .advance(ActionState::Done(ActionOutcome::skipped("dry-run")))
            .unwrap();

        let mut applying = ActionState::Applying;
        assert!(
            applying
                .advance(ActionState::Done(ActionOutcome::skipped("late")))
                .is_err()
        );
        let mut pending = ActionState::Pending;
        assert!(
            pending
                .advance(ActionState::Done(ActionOutcome::Applied))
                .is_err()
        );
    }

    #[test]
    fn test_status() {
        let ok = ResultReport {
            entries: vec![
                entry("git", ActionOutcome::Applied),
                entry("vim", ActionOutcome::skipped("declined")),
            ],
            ..ResultReport::default()
        };
        assert_eq!(ok.status(), OverallStatus::FullySucceeded);

        let partial = ResultReport {
            entries: vec![
                entry("git", ActionOutcome::Applied),
                entry("vim", ActionOutcome::failed("exit status 1")),
            ],
            ..ResultReport::default()
        };
        assert_eq!(partial.status(), OverallStatus::PartiallyFailed);
        assert_eq!(partial.status().exit_code(), 1);

        let degraded = ResultReport {
            advisories: vec![Advisory::BackendUnavailable {
                backend: BackendId::new("brew"),
                reason: "not found".into(),
            }],
            ..ResultReport::default()
        };
        assert_eq!(degraded.status(), OverallStatus::PartiallyFailed);

        let cancelled = ResultReport {
            entries: vec![entry("git", ActionOutcome::skipped("cancelled"))],
            cancelled: true,
            ..ResultReport::default()
        };
        assert_eq!(cancelled.status(), OverallStatus::Aborted);

        let aborted = ResultReport::aborted("conflict", Vec::new());
        assert_eq!(aborted.status().exit_code(), 2);
    }

    #[test]
    fn test_summary() {
        let report = ResultReport {
            entries: vec![
                entry("git", ActionOutcome::Applied),
                entry("vim", ActionOutcome::failed("boom")),
                entry("nano", ActionOutcome::skipped("dry-run")),
            ],
            ..ResultReport::default()
        };
        let summary = report.summary();
        assert_eq!(summary.installed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 3);
    }
}
