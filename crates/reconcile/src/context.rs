//! Hooks injected by the caller: confirmation, progress, cancellation
//!
//! These traits keep the engine free of terminal I/O so ordering and
//! cancellation logic stay testable without a real terminal.

use crate::error::Result;
use crate::plan::{Action, GroupKind};
use crate::report::ActionOutcome;
use crate::types::BackendId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// What a confirmation request covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmScope {
    /// The whole plan
    Plan,
    /// One batch of one backend
    Group { backend: BackendId, kind: GroupKind },
}

/// A request to proceed with some actions
#[derive(Debug)]
pub struct ConfirmRequest<'a> {
    pub prompt: String,
    pub scope: ConfirmScope,
    pub actions: Vec<&'a Action>,
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback: Send {
    /// Ask whether to proceed
    ///
    /// # Returns
    /// `true` to proceed, `false` to skip the covered actions
    fn confirm(&mut self, request: &ConfirmRequest<'_>) -> Result<bool>;
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _request: &ConfirmRequest<'_>) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _request: &ConfirmRequest<'_>) -> Result<bool> {
        Ok(false)
    }
}

/// Progress callback for snapshot and execution
///
/// Called from backend workers concurrently, hence `&self` and `Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Called when a backend query starts
    fn on_query_start(&self, backend: &BackendId);

    /// Called when a backend query finishes; `error` is set on failure
    fn on_query_complete(&self, backend: &BackendId, error: Option<&str>);

    /// Called before an adapter batch is issued
    fn on_group_start(&self, backend: &BackendId, kind: GroupKind, count: usize);

    /// Called once per action when its final outcome is known
    fn on_action_complete(&self, action: &Action, outcome: &ActionOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_query_start(&self, _backend: &BackendId) {}
    fn on_query_complete(&self, _backend: &BackendId, _error: Option<&str>) {}
    fn on_group_start(&self, _backend: &BackendId, _kind: GroupKind, _count: usize) {}
    fn on_action_complete(&self, _action: &Action, _outcome: &ActionOutcome) {}
}

/// Session-wide cancellation signal
///
/// Once cancelled, no new adapter call is issued. A call already in
/// flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time and cancellation budget of one mutating adapter call
///
/// The deadline is fixed when the budget is created, so every subprocess
/// and retry inside the call shares it. Adapters check the token before
/// starting work on each package.
#[derive(Debug, Clone)]
pub struct CallBudget {
    timeout: Duration,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl CallBudget {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            timeout,
            deadline: Instant::now().checked_add(timeout),
            cancel,
        }
    }

    /// Budget that can only run out of time
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, CancelToken::new())
    }

    /// The total time granted to the call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline; `None` once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero()),
            None => Some(self.timeout),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_budget_runs_out() {
        let budget = CallBudget::with_timeout(Duration::from_millis(50));
        assert!(budget.remaining().is_some_and(|left| left <= Duration::from_millis(50)));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(budget.remaining(), None);
        assert_eq!(budget.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_budget_follows_token() {
        let token = CancelToken::new();
        let budget = CallBudget::new(Duration::from_secs(5), token.clone());
        assert!(!budget.is_cancelled());
        token.cancel();
        assert!(budget.is_cancelled());
    }
}
