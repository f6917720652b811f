//! Arch Linux pacman adapter.
//!
//! Two flavours share the package database: native packages from the sync
//! repositories, and foreign packages (AUR) installed through a helper such
//! as `paru` or `yay`. Both track explicit vs dependency install reasons.

use crate::backend::{apply_batch, parse_package_lines};
use crate::command::{CommandOutput, run};
use crate::error::ErrorCategory;
use crate::retry::RetryConfig;
use reconcile::{Backend, BackendId, BatchOutcome, CallBudget, Capabilities, PackageRef};
use std::collections::BTreeSet;
use std::time::Duration;

/// Which slice of the pacman database the adapter owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacmanFlavor {
    /// Packages from the sync repositories (`-Qn`)
    Native,
    /// Packages not found in any sync repository (`-Qm`)
    Foreign,
}

impl PacmanFlavor {
    fn filter(self) -> &'static str {
        match self {
            Self::Native => "n",
            Self::Foreign => "m",
        }
    }
}

/// Adapter over the `pacman` CLI
#[derive(Debug, Clone)]
pub struct PacmanBackend {
    id: BackendId,
    flavor: PacmanFlavor,
    program: String,
    helper: Option<String>,
    sudo: bool,
    retry: RetryConfig,
}

impl PacmanBackend {
    /// Adapter for repository packages, mutating through `sudo pacman`.
    pub fn native(id: impl Into<BackendId>) -> Self {
        Self {
            id: id.into(),
            flavor: PacmanFlavor::Native,
            program: "pacman".to_string(),
            helper: None,
            sudo: true,
            retry: RetryConfig::default(),
        }
    }

    /// Adapter for foreign packages; installs need an AUR helper.
    pub fn foreign(id: impl Into<BackendId>, helper: Option<String>) -> Self {
        Self {
            flavor: PacmanFlavor::Foreign,
            helper,
            ..Self::native(id)
        }
    }

    /// Prefix privileged calls with `sudo -n` (default on).
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Use a different pacman binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn flavor(&self) -> PacmanFlavor {
        self.flavor
    }

    /// Whether mutations go through sudo
    pub fn uses_sudo(&self) -> bool {
        self.sudo
    }

    fn query(&self, flags: &str, timeout: Duration, operation: &str) -> reconcile::Result<BTreeSet<PackageRef>> {
        let result = run(&self.program, &[flags], timeout).and_then(|output| {
            if no_matches(&output) {
                return Ok(BTreeSet::new());
            }
            let output = output.check(&format!("{} {flags}", self.program), &[0])?;
            parse_package_lines(&self.id, &output.stdout, None)
        });
        result.map_err(|e| e.into_backend_error(&self.id, operation))
    }

    /// Program and leading arguments for a privileged pacman call
    fn privileged(&self, args: &[&str]) -> (String, Vec<String>) {
        let mut argv: Vec<String> = Vec::new();
        let program = if self.sudo {
            argv.push("-n".to_string());
            argv.push(self.program.clone());
            "sudo".to_string()
        } else {
            self.program.clone()
        };
        argv.extend(args.iter().map(|a| (*a).to_string()));
        (program, argv)
    }

    /// Command line installing `packages`
    fn install_command(&self, packages: &[PackageRef]) -> (String, Vec<String>) {
        let (program, mut argv) = match (&self.flavor, &self.helper) {
            // Helpers call sudo themselves and refuse to run as root
            (PacmanFlavor::Foreign, Some(helper)) => (
                helper.clone(),
                vec!["-S".to_string(), "--needed".to_string(), "--noconfirm".to_string()],
            ),
            _ => self.privileged(&["-S", "--needed", "--noconfirm"]),
        };
        for package in packages {
            argv.extend(package.install_arg().split_whitespace().map(str::to_string));
        }
        (program, argv)
    }

    fn mutate(
        &self,
        operation: &str,
        packages: &[PackageRef],
        budget: &CallBudget,
        build: impl Fn(&[PackageRef]) -> (String, Vec<String>),
        absent_ok: bool,
    ) -> BatchOutcome {
        apply_batch(&self.id, operation, packages, true, &self.retry, budget, |batch, left| {
            let (program, argv) = build(batch);
            let args: Vec<&str> = argv.iter().map(String::as_str).collect();
            let display = format!("{program} {}", argv.join(" "));
            let output = run(&program, &args, left)?;
            match output.check(&display, &[0]) {
                Ok(_) => Ok(()),
                // pacman aborts the whole transaction on an unknown target,
                // so only a lone package can be taken as already absent
                Err(e) if absent_ok && batch.len() == 1 && e.category() == ErrorCategory::NotFound => {
                    log::debug!("{}: {display}: {e}", self.id);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
    }

    fn names(packages: &[PackageRef]) -> impl Iterator<Item = &str> {
        packages.iter().map(|p| p.name.as_str())
    }
}

impl Backend for PacmanBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            explicit_tracking: true,
            install: self.flavor == PacmanFlavor::Native || self.helper.is_some(),
            remove: true,
            mark: true,
            ..Capabilities::default()
        }
    }

    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn list_installed(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        let flags = format!("-Q{}", self.flavor.filter());
        self.query(&flags, timeout, "list installed")
    }

    fn list_explicit(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        let flags = format!("-Qqe{}", self.flavor.filter());
        self.query(&flags, timeout, "list explicit")
    }

    fn install(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        if !self.capabilities().install {
            return Err(reconcile::Error::Unsupported {
                backend: self.id.clone(),
                capability: "install",
            });
        }
        Ok(self.mutate("install", packages, budget, |batch| self.install_command(batch), false))
    }

    fn remove(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        Ok(self.mutate(
            "remove",
            packages,
            budget,
            |batch| {
                let mut args = vec!["-R", "--noconfirm"];
                args.extend(Self::names(batch));
                self.privileged(&args)
            },
            true,
        ))
    }

    fn mark_explicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        Ok(self.mutate(
            "mark-explicit",
            packages,
            budget,
            |batch| {
                let mut args = vec!["-D", "--asexplicit"];
                args.extend(Self::names(batch));
                self.privileged(&args)
            },
            false,
        ))
    }

    fn mark_implicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        Ok(self.mutate(
            "mark-implicit",
            packages,
            budget,
            |batch| {
                let mut args = vec!["-D", "--asdeps"];
                args.extend(Self::names(batch));
                self.privileged(&args)
            },
            false,
        ))
    }
}

/// pacman exits 1 without output when a filtered query matches nothing
fn no_matches(output: &CommandOutput) -> bool {
    output.code == Some(1) && output.stdout.trim().is_empty() && output.stderr.trim().is_empty()
}
