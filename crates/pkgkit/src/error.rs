//! Error types for package manager subprocesses.
//!
//! Errors are categorized to enable smart retry logic and to decide
//! whether a failure belongs to one package or to the whole adapter.

use reconcile::BackendId;
use std::time::Duration;
use thiserror::Error;

/// Categories of subprocess errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Package manager binary missing or not runnable
    Unavailable,
    /// Network-related errors (retryable)
    Transient,
    /// Another process holds the package database lock (retryable)
    Locked,
    /// Package not found or not installed
    NotFound,
    /// Permission denied (may need sudo)
    Permission,
    /// Command exceeded its deadline
    Timeout,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Locked)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unavailable => "Package manager not available",
            Self::Transient => "Network connectivity issue",
            Self::Locked => "Package database is locked",
            Self::NotFound => "Package not found",
            Self::Permission => "Permission denied",
            Self::Timeout => "Command timed out",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Unavailable => "Install the package manager or fix its path in the config",
            Self::Transient => "Check your internet connection and try again",
            Self::Locked => "Wait for the other package manager process to finish",
            Self::NotFound => "Verify the package name and repositories",
            Self::Permission => "Enable sudo for this manager or run with appropriate access",
            Self::Timeout => "Raise the timeout or check for an interactive prompt",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while running a package manager.
#[derive(Debug, Error)]
pub enum Error {
    /// Program is not installed or not in PATH
    #[error("program not found: {program}")]
    ProgramNotFound {
        /// Name of the missing program
        program: String,
    },

    /// Process could not be started
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exceeded its deadline and was killed
    #[error("'{command}' timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// Command exited unsuccessfully
    #[error("'{command}' failed{}: {}", code.map(|c| format!(" with exit code {c}")).unwrap_or_default(), stderr_summary(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        /// Standard error output from the failed command
        stderr: String,
        category: ErrorCategory,
    },

    /// Command output could not be parsed
    #[error("unparseable output: {0}")]
    Parse(String),

    /// Command template is invalid
    #[error("invalid command template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid list regex
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ProgramNotFound { .. } | Self::Spawn { .. } => ErrorCategory::Unavailable,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::CommandFailed { category, .. } => *category,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the error is about the adapter rather than one package.
    ///
    /// Such errors stop a batch instead of being attributed per package.
    pub fn is_adapter_fault(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Unavailable | ErrorCategory::Timeout
        )
    }

    /// Create an error from a failed command's output.
    ///
    /// Analyzes stderr (falling back to stdout, since some package
    /// managers print errors there) to categorize the error.
    pub fn from_command_output(command: &str, code: Option<i32>, stderr: &str, stdout: &str) -> Self {
        let text = if stderr.trim().is_empty() { stdout } else { stderr };
        Self::CommandFailed {
            command: command.to_string(),
            code,
            stderr: text.trim().to_string(),
            category: categorize(text),
        }
    }

    /// Convert into the engine's error taxonomy.
    pub fn into_backend_error(self, backend: &BackendId, operation: &str) -> reconcile::Error {
        match self {
            Self::Timeout { timeout, .. } => reconcile::Error::BackendTimeout {
                backend: backend.clone(),
                operation: operation.to_string(),
                timeout,
            },
            Self::Parse(_) | Self::Json(_) => reconcile::Error::BackendQueryError {
                backend: backend.clone(),
                message: self.to_string(),
            },
            other => reconcile::Error::unavailable(backend, other.to_string()),
        }
    }
}

/// Categorize a failure from the text a package manager printed.
pub fn categorize(output: &str) -> ErrorCategory {
    let lower = output.to_lowercase();

    // Database locks (pacman, apt, dnf, brew)
    if lower.contains("unable to lock database")
        || lower.contains("could not get lock")
        || lower.contains("waiting for cache lock")
        || lower.contains("another brew")
        || lower.contains("is locked")
    {
        return ErrorCategory::Locked;
    }

    // Network errors
    if lower.contains("could not resolve")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("temporary failure")
        || lower.contains("failed retrieving file")
        || lower.contains("failed to download")
        || lower.contains("network")
        || lower.contains("curl")
    {
        return ErrorCategory::Transient;
    }

    // Not found / not installed
    if lower.contains("target not found")
        || lower.contains("no available formula")
        || lower.contains("no cask with this name")
        || lower.contains("no such keg")
        || lower.contains("is not installed")
        || lower.contains("not found")
    {
        return ErrorCategory::NotFound;
    }

    // Permission errors
    if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("unless you are root")
        || lower.contains("must be root")
        || lower.contains("a password is required")
        || lower.contains("a terminal is required")
    {
        return ErrorCategory::Permission;
    }

    ErrorCategory::Other
}

/// Last non-empty line of stderr, which usually carries the actual error
fn stderr_summary(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no error output")
}

/// Result type for package manager operations.
pub type Result<T> = std::result::Result<T, Error>;
