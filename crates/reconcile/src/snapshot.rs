//! State snapshot builder - queries backends into a `SystemState`
//!
//! Backends are queried in parallel, one worker per backend. Within a
//! backend the installed and explicit queries run one after the other so
//! the package manager's own lock is never contended.

use crate::adapter::{Backend, BoxedBackend};
use crate::context::ProgressCallback;
use crate::error::{Error, Result};
use crate::types::{BackendId, BackendSnapshot, SystemState};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Builds snapshots, caching each backend's result for the session
pub struct SnapshotBuilder {
    timeout: Duration,
    jobs: usize,
    cache: Mutex<BTreeMap<BackendId, BackendSnapshot>>,
}

impl SnapshotBuilder {
    pub fn new(timeout: Duration, jobs: usize) -> Self {
        Self {
            timeout,
            jobs: jobs.max(1),
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Query every backend and assemble the system state
    ///
    /// A failing backend never fails the build: it is recorded as
    /// unavailable with the reason and left out of the snapshots.
    pub fn build(
        &self,
        backends: &[BoxedBackend],
        progress: &dyn ProgressCallback,
    ) -> Result<SystemState> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        let results: Vec<(BackendId, Result<BackendSnapshot>)> = pool.install(|| {
            backends
                .par_iter()
                .map(|backend| {
                    let id = backend.id().clone();
                    let result = self.snapshot_one(backend.as_ref(), progress);
                    (id, result)
                })
                .collect()
        });

        let mut state = SystemState::new();
        for (id, result) in results {
            match result {
                Ok(snapshot) => state.insert(id, snapshot),
                Err(e) => {
                    log::warn!("Backend '{id}' unavailable for this session: {e}");
                    state.mark_unavailable(id, e.to_string());
                }
            }
        }
        Ok(state)
    }

    /// Drop the cached snapshot of a backend (after it was mutated)
    pub fn invalidate(&self, backend: &BackendId) {
        self.lock_cache().remove(backend);
    }

    fn snapshot_one(
        &self,
        backend: &dyn Backend,
        progress: &dyn ProgressCallback,
    ) -> Result<BackendSnapshot> {
        let id = backend.id();
        if let Some(cached) = self.lock_cache().get(id) {
            log::debug!("Using cached snapshot for '{id}'");
            return Ok(cached.clone());
        }

        progress.on_query_start(id);
        let result = self.query(backend);
        match &result {
            Ok(snapshot) => {
                progress.on_query_complete(id, None);
                self.lock_cache().insert(id.clone(), snapshot.clone());
            }
            Err(e) => progress.on_query_complete(id, Some(&e.to_string())),
        }
        result
    }

    fn query(&self, backend: &dyn Backend) -> Result<BackendSnapshot> {
        let id = backend.id();
        if !backend.is_available() {
            return Err(Error::unavailable(id, "package manager not found"));
        }

        let caps = backend.capabilities();
        log::debug!("Querying installed packages for '{id}'");
        let installed = backend.list_installed(self.timeout)?;
        let explicit = if caps.explicit_tracking {
            log::debug!("Querying explicit packages for '{id}'");
            backend.list_explicit(self.timeout)?
        } else {
            BTreeSet::new()
        };
        log::debug!(
            "'{id}': {} installed, {} explicit",
            installed.len(),
            explicit.len()
        );

        BackendSnapshot::new(id, installed, explicit, caps)
    }

    fn lock_cache(&self) -> MutexGuard<'_, BTreeMap<BackendId, BackendSnapshot>> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
