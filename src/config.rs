//! Configuration loading
//!
//! `pkgsync.toml` holds `[settings]`, the `[manager.*]` definitions and
//! optionally `[packages.*]`. Every other `*.toml` file in the config
//! directory may only contain `[packages.*]` tables; files are merged in
//! sorted filename order after `pkgsync.toml`.

use anyhow::{Context, Result, bail};
use pkgkit::CommandSpec;
use reconcile::{BackendId, DesiredState, PackageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main config file name
pub const MAIN_FILE: &str = "pkgsync.toml";

/// File written by `pkgsync save`
pub const SAVE_FILE: &str = "99.unsorted.toml";

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Abort when any manager cannot be queried
    pub strict: bool,
    pub query_timeout_secs: u64,
    pub apply_timeout_secs: u64,
    /// Managers processed in parallel
    pub jobs: usize,
    /// Mark untracked explicit packages as dependencies
    pub demote_untracked: bool,
    /// Re-query managers after applying
    pub verify: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict: false,
            query_timeout_secs: 120,
            apply_timeout_secs: 1800,
            jobs: 4,
            demote_untracked: false,
            verify: true,
        }
    }
}

// ============================================================================
// Managers
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    /// Defined by shell command templates
    #[default]
    Command,
    Pacman,
    PacmanForeign,
    Brew,
    BrewCask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub kind: ManagerKind,
    #[serde(default)]
    pub disabled: bool,
    /// Run privileged pacman calls through sudo
    #[serde(default = "default_true")]
    pub sudo: bool,
    /// AUR helper used to install foreign packages
    #[serde(default)]
    pub helper: Option<String>,
    #[serde(flatten)]
    pub command: CommandSpec,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Packages
// ============================================================================

/// One entry of an `explicit` list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PackageEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        extra: Option<String>,
        #[serde(default)]
        source: Option<String>,
    },
}

impl PackageEntry {
    fn into_ref(self, backend: &BackendId) -> PackageRef {
        match self {
            Self::Name(name) => PackageRef::new(backend, name),
            Self::Detailed {
                name,
                version,
                extra,
                source,
            } => PackageRef {
                version,
                extra,
                source,
                ..PackageRef::new(backend, name)
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageTable {
    pub explicit: Vec<PackageEntry>,
    pub excluded: Vec<String>,
    /// Never reported as untracked
    pub ignore: Vec<String>,
    /// Removed from the explicit set accumulated by earlier files
    pub forget: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    settings: Option<Settings>,
    manager: BTreeMap<String, ManagerConfig>,
    packages: BTreeMap<String, PackageTable>,
}

// ============================================================================
// Loaded config
// ============================================================================

/// Fully merged configuration
#[derive(Debug)]
pub struct Config {
    pub dir: PathBuf,
    pub settings: Settings,
    /// Enabled managers by name
    pub managers: BTreeMap<String, ManagerConfig>,
    pub desired: DesiredState,
}

impl Config {
    /// Load `pkgsync.toml` and every other `*.toml` file in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_inner(dir, None)
    }

    /// Load everything except `file`, e.g. the one `pkgsync save` rewrites.
    pub fn load_without(dir: &Path, file: &str) -> Result<Self> {
        Self::load_inner(dir, Some(file))
    }

    fn load_inner(dir: &Path, skip: Option<&str>) -> Result<Self> {
        let main_path = dir.join(MAIN_FILE);
        let main = read_file(&main_path)?;

        let mut managers = BTreeMap::new();
        let mut disabled = Vec::new();
        for (name, manager) in main.manager {
            if manager.disabled {
                log::warn!("Manager '{name}' is disabled, ignoring its packages");
                disabled.push(name);
            } else {
                managers.insert(name, manager);
            }
        }

        let mut config = Self {
            dir: dir.to_path_buf(),
            settings: main.settings.unwrap_or_default(),
            managers,
            desired: DesiredState::new(),
        };
        config.merge_packages(&main_path, main.packages, &disabled)?;

        for path in package_files(dir)? {
            if skip.is_some_and(|skip| path.file_name().is_some_and(|n| n == skip)) {
                continue;
            }
            let file = read_file(&path)?;
            if file.settings.is_some() || !file.manager.is_empty() {
                bail!(
                    "{}: [settings] and [manager.*] belong in {MAIN_FILE}",
                    path.display()
                );
            }
            config.merge_packages(&path, file.packages, &disabled)?;
        }

        Ok(config)
    }

    fn merge_packages(
        &mut self,
        path: &Path,
        packages: BTreeMap<String, PackageTable>,
        disabled: &[String],
    ) -> Result<()> {
        for (manager, table) in packages {
            if disabled.contains(&manager) {
                continue;
            }
            if !self.managers.contains_key(&manager) {
                bail!(
                    "{}: packages for unknown manager '{manager}' (define [manager.{manager}] in {MAIN_FILE})",
                    path.display()
                );
            }

            let id = BackendId::new(&manager);
            for name in &table.forget {
                if !self.desired.forget(&id, name) {
                    log::debug!("{}: forget '{name}' matched nothing", path.display());
                }
            }
            for entry in table.explicit {
                self.desired.require(entry.into_ref(&id));
            }
            for name in table.excluded {
                self.desired.exclude(PackageRef::new(&id, name));
            }
            for name in table.ignore {
                self.desired.ignore(&id, name);
            }
        }
        Ok(())
    }

    /// Enabled managers that run pacman through sudo
    pub fn sudo_managers(&self) -> Vec<&str> {
        self.managers
            .iter()
            .filter(|(_, m)| {
                m.sudo && matches!(m.kind, ManagerKind::Pacman | ManagerKind::PacmanForeign)
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

/// `*.toml` files other than the main one, in sorted order
fn package_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Could not read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_toml = path.extension().is_some_and(|e| e == "toml");
        let is_main = path.file_name().is_some_and(|n| n == MAIN_FILE);
        if is_toml && !is_main && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
