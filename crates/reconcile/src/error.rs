//! Error taxonomy for reconciliation
//!
//! Errors split into two families:
//! - structural errors (`ConflictingDesiredState`) abort the session before
//!   any mutation
//! - operational errors (adapter faults, per-package failures) are recovered
//!   locally and aggregated into the result report

use crate::types::{BackendId, PackageRef};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the reconciliation engine and by backend adapters
#[derive(Debug, Error)]
pub enum Error {
    /// Package manager binary or service cannot be reached
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: BackendId, reason: String },

    /// Query output could not be parsed
    #[error("backend '{backend}' returned malformed output: {message}")]
    BackendQueryError { backend: BackendId, message: String },

    /// Adapter call exceeded its deadline
    #[error("backend '{backend}' timed out after {}s during {operation}", .timeout.as_secs())]
    BackendTimeout {
        backend: BackendId,
        operation: String,
        timeout: Duration,
    },

    /// Desired state declares packages both explicit and excluded
    #[error("conflicting desired state: {} declared both explicit and excluded", list(.packages))]
    ConflictingDesiredState { packages: Vec<PackageRef> },

    /// A single install/remove/mark failed
    #[error("{package}: {message}")]
    PerPackageFailure { package: PackageRef, message: String },

    /// Backend lacks the requested capability
    #[error("backend '{backend}' does not support {capability}")]
    Unsupported {
        backend: BackendId,
        capability: &'static str,
    },

    /// Action state machine was driven through an illegal edge
    #[error("invalid action transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Confirmation hook failed (e.g. terminal went away)
    #[error("confirmation failed: {0}")]
    Confirmation(String),

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Faults of the adapter itself rather than of one package.
    ///
    /// After one of these, every remaining action of the backend fails
    /// without being attempted.
    pub fn is_adapter_fault(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. }
                | Self::BackendQueryError { .. }
                | Self::BackendTimeout { .. }
        )
    }

    /// Structural errors that must abort the whole session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConflictingDesiredState { .. })
    }

    /// Missing capability, handled as a no-op with an advisory
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Shorthand for an unavailable backend
    pub fn unavailable(backend: &BackendId, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.clone(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a per-package failure
    pub fn package(package: &PackageRef, message: impl Into<String>) -> Self {
        Self::PerPackageFailure {
            package: package.clone(),
            message: message.into(),
        }
    }
}

fn list(packages: &[PackageRef]) -> String {
    packages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;
