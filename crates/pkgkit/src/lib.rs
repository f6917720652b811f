//! # pkgkit
//!
//! Package manager adapters for the [`reconcile`] engine.
//!
//! This crate provides:
//! - [`CommandBackend`]: a backend defined by shell command templates
//! - [`PacmanBackend`]: native and foreign (AUR) pacman packages
//! - [`BrewBackend`]: Homebrew formulae and casks
//! - a subprocess runner that kills commands at their deadline
//!
//! ## Example
//!
//! ```no_run
//! use pkgkit::{CommandBackend, CommandSpec};
//! use reconcile::{Backend, CallBudget, PackageRef};
//! use std::time::Duration;
//!
//! let spec = CommandSpec {
//!     install_cmd: Some("pipx install {}".to_string()),
//!     remove_cmd: Some("pipx uninstall {}".to_string()),
//!     list_regex: Some(r"^\s*package (?P<name>\S+) (?P<version>\S+)".to_string()),
//!     ..CommandSpec::new("pipx list --short")
//! };
//! let pipx = CommandBackend::new("pipx", spec).unwrap();
//!
//! let outcome = pipx
//!     .install(
//!         &[PackageRef::new("pipx", "httpie")],
//!         &CallBudget::with_timeout(Duration::from_secs(600)),
//!     )
//!     .unwrap();
//! for (package, error) in &outcome.failed {
//!     eprintln!("{package}: {error}");
//! }
//! ```
//!
//! ## Retry Logic
//!
//! Network errors and package database locks during mutations are retried
//! with exponential backoff. Configure retry behavior with [`RetryConfig`].
//! When a batched command fails, each package is re-run alone so failures
//! are attributed to exactly the packages that caused them.

pub mod backend;
pub mod command;
pub mod error;
pub mod retry;

pub use backend::{BrewBackend, BrewKind, CommandBackend, CommandSpec, PacmanBackend, PacmanFlavor};
pub use command::{CommandOutput, CommandTemplate};
pub use error::{Error, ErrorCategory, Result};
pub use retry::{LogCallback, RetryCallback, RetryConfig, with_retry, with_retry_within};
