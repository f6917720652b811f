//! # Reconcile
//!
//! A state reconciliation engine for package managers.
//!
//! The engine compares a declared [`DesiredState`] with the [`SystemState`]
//! queried from one or more package-manager backends, computes a [`Plan`]
//! of actions, and applies it with per-package outcome tracking.
//!
//! ## Core Concepts
//!
//! - **Backend**: an adapter over one package manager (query, install, remove, mark)
//! - **DesiredState**: explicit and excluded packages per backend
//! - **SystemState**: installed and explicitly-installed packages per backend
//! - **Plan**: ordered actions plus advisories (untracked packages, unavailable backends)
//! - **Session**: snapshot, diff, confirm, execute, verify
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     AutoConfirm, DesiredState, Mode, NoProgress, PackageRef, Session, SessionOptions,
//! };
//!
//! let mut desired = DesiredState::new();
//! desired
//!     .require(PackageRef::new("pacman", "git"))
//!     .exclude(PackageRef::new("pacman", "nano"));
//!
//! let options = SessionOptions {
//!     mode: Mode::Apply { assume_yes: true },
//!     ..SessionOptions::default()
//! };
//! let session = Session::new(backends, options);
//! let report = session.run(&desired, &mut AutoConfirm, &NoProgress)?;
//! std::process::exit(report.status().exit_code().into());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Backend`]: package manager adapter
//! - [`ConfirmCallback`]: proceed/skip decisions for the plan or each group
//! - [`ProgressCallback`]: query and execution progress
//!
//! The engine does no terminal I/O of its own.

pub mod adapter;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod plan;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod types;

// Re-export main types at crate root
pub use adapter::{Backend, BatchOutcome, BoxedBackend};
pub use context::{
    AutoConfirm, AutoDecline, CallBudget, CancelToken, ConfirmCallback, ConfirmRequest,
    ConfirmScope, NoProgress, ProgressCallback,
};
pub use diff::{DiffOptions, diff, diff_with};
pub use error::{Error, Result};
pub use executor::{ConfirmPolicy, ExecuteOptions, execute};
pub use plan::{Action, ActionGroup, ActionKind, Advisory, GroupKind, Plan};
pub use report::{ActionOutcome, ActionState, OverallStatus, ReportEntry, ReportSummary, ResultReport};
pub use session::{Mode, Session, SessionOptions};
pub use snapshot::SnapshotBuilder;
pub use types::{
    ApplyOrder, BackendId, BackendSnapshot, Capabilities, DesiredBackend, DesiredState,
    PackageRef, SystemState,
};
