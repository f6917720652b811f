//! Terminal hooks for the reconciliation session: confirmation prompts and
//! per-manager spinners.

use crate::ui;
use colored::Colorize;
use dialoguer::console::Term;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{
    Action, ActionOutcome, BackendId, ConfirmCallback, ConfirmRequest, ConfirmScope, GroupKind,
    ProgressCallback,
};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// Confirmation
// ============================================================================

/// Asks on the terminal before anything is changed
pub struct TerminalConfirm {
    interactive: bool,
}

impl TerminalConfirm {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }
}

impl Default for TerminalConfirm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> reconcile::Result<bool> {
        // Never block on a pipe or in CI
        if !self.interactive {
            log::warn!("stdin is not a terminal, declining: {}", request.prompt);
            ui::warn("Not a terminal: nothing applied (use --yes to apply unattended)");
            return Ok(false);
        }

        match &request.scope {
            ConfirmScope::Plan => ui::actions(&request.actions),
            ConfirmScope::Group { backend, .. } => {
                ui::section(backend.as_str());
                for action in &request.actions {
                    println!("  {} {}", "•".dimmed(), action.package.name);
                }
            }
        }
        println!();

        let destructive = request.actions.iter().any(|a| a.kind.is_destructive());
        Confirm::new()
            .with_prompt(&request.prompt)
            .default(!destructive)
            .interact_on(&Term::stderr())
            .map_err(|e| reconcile::Error::Confirmation(e.to_string()))
    }
}

// ============================================================================
// Progress
// ============================================================================

/// One spinner per manager while it is queried or mutated
pub struct Spinners {
    visible: bool,
    bars: Mutex<BTreeMap<BackendId, ProgressBar>>,
}

impl Spinners {
    /// Spinners are drawn only on a terminal and never in quiet or JSON mode
    pub fn new(quiet: bool) -> Self {
        Self {
            visible: !quiet && Term::stderr().is_term(),
            bars: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<BackendId, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, backend: &BackendId, message: String) {
        if !self.visible {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(message);
        if let Some(previous) = self.lock().insert(backend.clone(), pb) {
            previous.finish_and_clear();
        }
    }

    fn finish(&self, backend: &BackendId) {
        if let Some(pb) = self.lock().remove(backend) {
            pb.finish_and_clear();
        }
    }
}

fn group_verb(kind: GroupKind) -> &'static str {
    match kind {
        GroupKind::Install => "installing",
        GroupKind::Remove => "removing",
        GroupKind::Metadata => "re-marking",
    }
}

impl ProgressCallback for Spinners {
    fn on_query_start(&self, backend: &BackendId) {
        self.start(backend, format!("{backend}: querying installed packages"));
    }

    fn on_query_complete(&self, backend: &BackendId, error: Option<&str>) {
        self.finish(backend);
        if let Some(error) = error {
            log::debug!("{backend}: query failed: {error}");
        }
    }

    fn on_group_start(&self, backend: &BackendId, kind: GroupKind, count: usize) {
        self.start(
            backend,
            format!("{backend}: {} {count} package(s)", group_verb(kind)),
        );
    }

    fn on_action_complete(&self, action: &Action, outcome: &ActionOutcome) {
        let bars = self.lock();
        let Some(pb) = bars.get(action.backend()) else {
            return;
        };
        match outcome {
            ActionOutcome::Applied => pb.set_message(action.to_string()),
            ActionOutcome::Failed { error } => {
                pb.suspend(|| println!("  {} {}: {}", "✗".red(), action, error));
            }
            ActionOutcome::Skipped { .. } => {}
        }
    }
}

impl Drop for Spinners {
    fn drop(&mut self) {
        for (_, pb) in std::mem::take(&mut *self.lock()) {
            pb.finish_and_clear();
        }
    }
}
