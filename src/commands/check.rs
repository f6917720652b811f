//! `pkgsync check` - validate the config and probe every manager

use crate::Context;
use crate::backends;
use crate::config::Config;
use crate::paths;
use crate::ui;
use anyhow::Result;
use reconcile::Capabilities;
use std::process::ExitCode;

pub fn run(ctx: &Context) -> Result<ExitCode> {
    ui::header("pkgsync check");

    let dir = paths::config_dir(ctx.config_dir.as_deref())?;
    ui::kv("Config", &dir.display().to_string());

    let config = match Config::load(&dir) {
        Ok(config) => config,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            return Ok(ExitCode::from(1));
        }
    };

    let mut problems = 0;

    let conflicts = config.desired.conflicts();
    for package in &conflicts {
        ui::error(&format!("{package} is both explicit and excluded"));
    }
    problems += conflicts.len();

    ui::section(&format!("Managers ({})", config.managers.len()));
    for (name, manager) in &config.managers {
        let backend = match backends::build_one(name, manager) {
            Ok(backend) => backend,
            Err(e) => {
                ui::error(&format!("{name}: {e:#}"));
                problems += 1;
                continue;
            }
        };

        if backend.is_available() {
            ui::success(&format!("{name} ({})", describe(backend.capabilities())));
        } else {
            ui::error(&format!("{name}: package manager not found"));
            problems += 1;
        }

        if ctx.verbose > 0
            && let Some(desired) = config.desired.backend(backend.id())
        {
            ui::dim(&format!(
                "{} explicit, {} excluded, {} ignored",
                desired.explicit.len(),
                desired.excluded.len(),
                desired.ignored.len()
            ));
        }
    }

    println!();
    if problems == 0 {
        ui::success("Configuration OK");
        Ok(ExitCode::SUCCESS)
    } else {
        ui::warn(&format!("{problems} problem(s) found"));
        Ok(ExitCode::from(1))
    }
}

/// Short capability list, e.g. "install, remove, explicit tracking"
fn describe(caps: Capabilities) -> String {
    let flags = [
        (caps.install, "install"),
        (caps.remove, "remove"),
        (caps.explicit_tracking, "explicit tracking"),
        (caps.mark, "mark"),
    ];
    let names: Vec<&str> = flags
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "read-only".to_string()
    } else {
        names.join(", ")
    }
}
