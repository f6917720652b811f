//! Build package manager adapters from `[manager.*]` tables

use crate::config::{Config, ManagerConfig, ManagerKind};
use anyhow::{Context, Result};
use pkgkit::{BrewBackend, BrewKind, CommandBackend, PacmanBackend};
use reconcile::BoxedBackend;

/// Create one adapter per enabled manager, ordered by name.
pub fn build(config: &Config) -> Result<Vec<BoxedBackend>> {
    config
        .managers
        .iter()
        .map(|(name, manager)| {
            build_one(name, manager).with_context(|| format!("Invalid manager '{name}'"))
        })
        .collect()
}

pub fn build_one(name: &str, manager: &ManagerConfig) -> Result<BoxedBackend> {
    let backend: BoxedBackend = match manager.kind {
        ManagerKind::Command => Box::new(CommandBackend::new(name, manager.command.clone())?),
        ManagerKind::Pacman => Box::new(PacmanBackend::native(name).with_sudo(manager.sudo)),
        ManagerKind::PacmanForeign => Box::new(
            PacmanBackend::foreign(name, manager.helper.clone()).with_sudo(manager.sudo),
        ),
        ManagerKind::Brew => Box::new(BrewBackend::new(name, BrewKind::Formula)),
        ManagerKind::BrewCask => Box::new(BrewBackend::new(name, BrewKind::Cask)),
    };
    log::debug!("Configured manager '{name}' ({:?})", manager.kind);
    Ok(backend)
}
