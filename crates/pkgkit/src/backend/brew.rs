//! Homebrew adapter using `brew` commands.
//!
//! Formulae record whether they were installed on request, which gives
//! explicit tracking. Casks have no such flag: every installed cask counts
//! as explicit.

use crate::backend::apply_batch;
use crate::command::run;
use crate::error::{Error, ErrorCategory, Result};
use crate::retry::RetryConfig;
use reconcile::{Backend, BackendId, BatchOutcome, CallBudget, Capabilities, PackageRef};
use std::collections::BTreeSet;
use std::time::Duration;

/// Which Homebrew package type the adapter manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrewKind {
    Formula,
    Cask,
}

impl BrewKind {
    fn flag(self) -> &'static str {
        match self {
            Self::Formula => "--formula",
            Self::Cask => "--cask",
        }
    }
}

/// Installed packages from `brew info --json=v2 --installed`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BrewInventory {
    pub installed: BTreeSet<PackageRef>,
    /// Installed on request (formulae only)
    pub explicit: BTreeSet<PackageRef>,
}

/// Backend that executes real `brew` commands.
#[derive(Debug, Clone)]
pub struct BrewBackend {
    id: BackendId,
    kind: BrewKind,
    /// Path to the brew executable, `None` when Homebrew is missing
    brew_path: Option<String>,
    retry: RetryConfig,
}

impl BrewBackend {
    /// Create a backend, locating `brew` in the usual prefixes.
    pub fn new(id: impl Into<BackendId>, kind: BrewKind) -> Self {
        Self {
            id: id.into(),
            kind,
            brew_path: find_brew(),
            retry: RetryConfig::default(),
        }
    }

    /// Use a specific brew executable.
    pub fn with_brew_path(mut self, path: impl Into<String>) -> Self {
        self.brew_path = Some(path.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn kind(&self) -> BrewKind {
        self.kind
    }

    /// Run a brew command and return stdout on success.
    fn run_brew(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let brew = self.brew_path.as_deref().ok_or_else(|| Error::ProgramNotFound {
            program: "brew".to_string(),
        })?;
        let display = format!("brew {}", args.join(" "));
        let output = run(brew, args, timeout)?.check(&display, &[0])?;
        Ok(output.stdout)
    }

    fn inventory(&self, timeout: Duration, operation: &str) -> reconcile::Result<BrewInventory> {
        let args: &[&str] = match self.kind {
            BrewKind::Formula => &["info", "--json=v2", "--installed"],
            BrewKind::Cask => &["info", "--json=v2", "--cask", "--installed"],
        };
        self.run_brew(args, timeout)
            .and_then(|stdout| {
                let json: serde_json::Value = serde_json::from_str(&stdout)?;
                Ok(match self.kind {
                    BrewKind::Formula => parse_installed_formulas(&self.id, &json),
                    BrewKind::Cask => parse_installed_casks(&self.id, &json),
                })
            })
            .map_err(|e| e.into_backend_error(&self.id, operation))
    }

    fn mutate(
        &self,
        operation: &str,
        command: &[&str],
        packages: &[PackageRef],
        budget: &CallBudget,
        absent_ok: bool,
    ) -> BatchOutcome {
        apply_batch(&self.id, operation, packages, true, &self.retry, budget, |batch, left| {
            let mut args = command.to_vec();
            args.extend(batch.iter().map(|p| p.source.as_deref().unwrap_or(&p.name)));
            match self.run_brew(&args, left) {
                Ok(_) => Ok(()),
                // A missing keg in a batch says nothing about the others
                Err(e) if absent_ok && batch.len() == 1 && e.category() == ErrorCategory::NotFound => {
                    log::debug!("{}: {e}", self.id);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
    }
}

impl Backend for BrewBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        let formula = self.kind == BrewKind::Formula;
        Capabilities {
            explicit_tracking: formula,
            mark: formula,
            ..Capabilities::default()
        }
    }

    fn is_available(&self) -> bool {
        self.brew_path.is_some()
    }

    fn list_installed(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        Ok(self.inventory(timeout, "list installed")?.installed)
    }

    fn list_explicit(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        Ok(self.inventory(timeout, "list explicit")?.explicit)
    }

    fn install(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        Ok(self.mutate("install", &["install", self.kind.flag()], packages, budget, false))
    }

    fn remove(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        Ok(self.mutate("remove", &["uninstall", self.kind.flag()], packages, budget, true))
    }

    fn mark_explicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mark(packages, budget, "--installed-on-request", "mark-explicit")
    }

    fn mark_implicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mark(packages, budget, "--no-installed-on-request", "mark-implicit")
    }
}

impl BrewBackend {
    fn mark(
        &self,
        packages: &[PackageRef],
        budget: &CallBudget,
        flag: &str,
        capability: &'static str,
    ) -> reconcile::Result<BatchOutcome> {
        if self.kind == BrewKind::Cask {
            return Err(reconcile::Error::Unsupported {
                backend: self.id.clone(),
                capability,
            });
        }
        Ok(self.mutate(capability, &["tab", flag], packages, budget, false))
    }
}

/// Find the brew executable path.
fn find_brew() -> Option<String> {
    // Check common locations
    let paths = [
        "/opt/homebrew/bin/brew",              // Apple Silicon
        "/usr/local/bin/brew",                 // Intel
        "/home/linuxbrew/.linuxbrew/bin/brew", // Linux
    ];

    paths
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .map(|p| (*p).to_string())
        .or_else(|| which::which("brew").ok().map(|p| p.display().to_string()))
}

/// Parse installed formulas from brew info JSON.
pub fn parse_installed_formulas(backend: &BackendId, json: &serde_json::Value) -> BrewInventory {
    let mut inventory = BrewInventory::default();
    let Some(formulas) = json["formulae"].as_array() else {
        return inventory;
    };

    for formula in formulas {
        let Some(name) = formula["name"].as_str() else {
            continue;
        };
        let Some(first) = formula["installed"].as_array().and_then(|v| v.first()) else {
            continue;
        };

        let mut package = PackageRef::new(backend, name);
        if let Some(version) = first["version"].as_str() {
            package = package.with_version(version);
        }
        if first["installed_on_request"].as_bool().unwrap_or(false) {
            inventory.explicit.insert(package.clone());
        }
        inventory.installed.insert(package);
    }

    inventory
}

/// Parse installed casks from brew info JSON.
pub fn parse_installed_casks(backend: &BackendId, json: &serde_json::Value) -> BrewInventory {
    let mut inventory = BrewInventory::default();
    let Some(casks) = json["casks"].as_array() else {
        return inventory;
    };

    for cask in casks {
        if let (Some(token), Some(version)) = (cask["token"].as_str(), cask["installed"].as_str()) {
            inventory
                .installed
                .insert(PackageRef::new(backend, token).with_version(version));
        }
    }

    // Casks are always explicit
    inventory.explicit = inventory.installed.clone();
    inventory
}
