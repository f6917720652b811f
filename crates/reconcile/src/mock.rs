//! In-memory backend for tests
//!
//! Behaves like an idempotent package manager with scriptable failures.
//! State and the call log live behind a shared handle so tests can inspect
//! them after the backend has been boxed and handed to a session.

use crate::adapter::{Backend, BatchOutcome};
use crate::context::{CallBudget, CancelToken};
use crate::error::{Error, Result};
use crate::types::{BackendId, Capabilities, PackageRef};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    installed: BTreeSet<String>,
    explicit: BTreeSet<String>,
    calls: Vec<String>,
    mutations: usize,
}

/// Shared view of a [`MockBackend`]'s state
#[derive(Debug, Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn installed(&self) -> BTreeSet<String> {
        self.lock().installed.clone()
    }

    pub fn explicit(&self) -> BTreeSet<String> {
        self.lock().explicit.clone()
    }

    /// Calls made so far, e.g. `"list_installed"` or `"install git vim"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Mutating calls only
    pub fn mutations(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !c.starts_with("list_"))
            .cloned()
            .collect()
    }

    /// Simulate a change made outside the engine
    pub fn install_externally(&self, name: &str, explicit: bool) {
        let mut state = self.lock();
        state.installed.insert(name.to_string());
        if explicit {
            state.explicit.insert(name.to_string());
        }
    }
}

/// Scriptable in-memory backend
pub struct MockBackend {
    id: BackendId,
    caps: Capabilities,
    state: MockHandle,
    available: bool,
    query_timeout: bool,
    failing: BTreeSet<String>,
    disconnect_after: Option<usize>,
    cancel_on_mutation: Option<CancelToken>,
    cancel_mid_batch: Option<(CancelToken, usize)>,
    ignore_marks: bool,
    refuse_marks: bool,
}

impl MockBackend {
    /// A reachable backend with explicit tracking and marking
    pub fn new(id: &str) -> Self {
        Self {
            id: BackendId::new(id),
            caps: Capabilities {
                explicit_tracking: true,
                mark: true,
                ..Capabilities::default()
            },
            state: MockHandle(Arc::new(Mutex::new(MockState::default()))),
            available: true,
            query_timeout: false,
            failing: BTreeSet::new(),
            disconnect_after: None,
            cancel_on_mutation: None,
            cancel_mid_batch: None,
            ignore_marks: false,
            refuse_marks: false,
        }
    }

    pub fn with_installed(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock();
            state.installed.extend(names.iter().map(ToString::to_string));
        }
        self
    }

    /// Mark packages explicit (they are installed too)
    pub fn with_explicit(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock();
            state.installed.extend(names.iter().map(ToString::to_string));
            state.explicit.extend(names.iter().map(ToString::to_string));
        }
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Every mutation of `name` fails with a per-package error
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// `is_available` returns false
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Queries fail with `BackendTimeout`
    pub fn timing_out(mut self) -> Self {
        self.query_timeout = true;
        self
    }

    /// After `n` successful mutating calls, every further call fails with
    /// `BackendUnavailable`
    pub fn disconnect_after(mut self, n: usize) -> Self {
        self.disconnect_after = Some(n);
        self
    }

    /// Cancel `token` once the first mutating call has finished
    pub fn cancel_on_mutation(mut self, token: CancelToken) -> Self {
        self.cancel_on_mutation = Some(token);
        self
    }

    /// Cancel `token` after `n` packages of a call have been handled; the
    /// rest of that call is reported as cancelled
    pub fn cancel_mid_batch(mut self, token: CancelToken, n: usize) -> Self {
        self.cancel_mid_batch = Some((token, n));
        self
    }

    /// Report mark calls as successful without changing state
    pub fn ignoring_marks(mut self) -> Self {
        self.ignore_marks = true;
        self
    }

    /// Advertise `mark` but answer mark calls with `Unsupported`
    pub fn refusing_marks(mut self) -> Self {
        self.refuse_marks = true;
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.state.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn mutate<F>(
        &self,
        verb: &str,
        packages: &[PackageRef],
        budget: &CallBudget,
        apply: F,
    ) -> Result<BatchOutcome>
    where
        F: Fn(&mut MockState, &str),
    {
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        self.record(format!("{verb} {}", names.join(" ")));

        let mut outcome = BatchOutcome::default();
        {
            let mut state = self.state.lock();
            if let Some(limit) = self.disconnect_after
                && state.mutations >= limit
            {
                return Err(Error::unavailable(&self.id, "connection lost"));
            }
            state.mutations += 1;

            for (handled, package) in packages.iter().enumerate() {
                if let Some((token, n)) = &self.cancel_mid_batch
                    && handled == *n
                {
                    token.cancel();
                }
                if budget.is_cancelled() {
                    outcome.cancelled.push(package.clone());
                } else if self.failing.contains(&package.name) {
                    outcome
                        .failed
                        .push((package.clone(), format!("failed to {verb} {}", package.name)));
                } else {
                    apply(&mut state, &package.name);
                    outcome.succeeded.push(package.clone());
                }
            }
        }

        if let Some(token) = &self.cancel_on_mutation {
            token.cancel();
        }
        Ok(outcome)
    }
}

impl Backend for MockBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn list_installed(&self, timeout: Duration) -> Result<BTreeSet<PackageRef>> {
        self.record("list_installed".to_string());
        if self.query_timeout {
            return Err(Error::BackendTimeout {
                backend: self.id.clone(),
                operation: "list installed".to_string(),
                timeout,
            });
        }
        let state = self.state.lock();
        Ok(state
            .installed
            .iter()
            .map(|n| PackageRef::new(&self.id, n.as_str()))
            .collect())
    }

    fn list_explicit(&self, _timeout: Duration) -> Result<BTreeSet<PackageRef>> {
        self.record("list_explicit".to_string());
        if !self.caps.explicit_tracking {
            return Ok(BTreeSet::new());
        }
        let state = self.state.lock();
        Ok(state
            .explicit
            .iter()
            .map(|n| PackageRef::new(&self.id, n.as_str()))
            .collect())
    }

    fn install(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        self.mutate("install", packages, budget, |state, name| {
            state.installed.insert(name.to_string());
            state.explicit.insert(name.to_string());
        })
    }

    fn remove(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        self.mutate("remove", packages, budget, |state, name| {
            state.installed.remove(name);
            state.explicit.remove(name);
        })
    }

    fn mark_explicit(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        if !self.caps.mark || self.refuse_marks {
            return Err(Error::Unsupported {
                backend: self.id.clone(),
                capability: "mark-explicit",
            });
        }
        let ignore = self.ignore_marks;
        self.mutate("mark_explicit", packages, budget, |state, name| {
            if !ignore && state.installed.contains(name) {
                state.explicit.insert(name.to_string());
            }
        })
    }

    fn mark_implicit(&self, packages: &[PackageRef], budget: &CallBudget) -> Result<BatchOutcome> {
        if !self.caps.mark || self.refuse_marks {
            return Err(Error::Unsupported {
                backend: self.id.clone(),
                capability: "mark-implicit",
            });
        }
        let ignore = self.ignore_marks;
        self.mutate("mark_implicit", packages, budget, |state, name| {
            if !ignore {
                state.explicit.remove(name);
            }
        })
    }
}
