//! `pkgsync save` - record the machine's drift in `99.unsorted.toml`
//!
//! Untracked explicit packages are written under `explicit`; declared
//! packages that are not installed are written under `forget`. Loading the
//! config afterwards yields exactly what is installed.

use crate::Context;
use crate::backends;
use crate::cli::SaveArgs;
use crate::config::{Config, SAVE_FILE};
use crate::paths;
use crate::prompt::Spinners;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use reconcile::{ActionKind, Advisory, Mode, Plan, Session};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::process::ExitCode;

#[derive(Debug, Default, Serialize)]
struct SavedTable {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    explicit: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    forget: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
struct SaveFile {
    packages: BTreeMap<String, SavedTable>,
}

impl SaveFile {
    fn from_plan(plan: &Plan) -> Self {
        let mut file = Self::default();
        for advisory in &plan.advisories {
            if let Advisory::Untracked { package } = advisory {
                file.table(package.backend.as_str())
                    .explicit
                    .push(package.name.clone());
            }
        }
        for action in &plan.actions {
            if action.kind == ActionKind::Install {
                file.table(action.backend().as_str())
                    .forget
                    .push(action.package.name.clone());
            }
        }
        file
    }

    fn table(&mut self, manager: &str) -> &mut SavedTable {
        self.packages.entry(manager.to_string()).or_default()
    }

    fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn render(&self, generated: &str) -> Result<String> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!(
            "# Generated by `pkgsync save` on {generated}\n\
             # Move entries into your own files, then delete this one.\n\n{body}"
        ))
    }
}

pub fn run(ctx: &Context, args: SaveArgs) -> Result<ExitCode> {
    let dir = paths::config_dir(ctx.config_dir.as_deref())?;
    let path = dir.join(SAVE_FILE);
    if path.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    // The file is about to be replaced, so its current content must not count
    let config = Config::load_without(&dir, SAVE_FILE)?;
    let options = super::session_options(&config.settings, &args.session, Mode::Preview);
    let session = Session::new(backends::build(&config)?, options);

    let spinners = Spinners::new(ctx.quiet);
    let plan = session.plan(&config.desired, &spinners)?;
    drop(spinners);

    for advisory in &plan.advisories {
        if let Advisory::BackendUnavailable { backend, reason } = advisory {
            ui::warn(&format!("Skipped {backend}: {reason}"));
        }
    }

    let file = SaveFile::from_plan(&plan);
    if file.is_empty() {
        ui::success("Config already matches the installed packages");
        return Ok(ExitCode::SUCCESS);
    }

    let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    fs::write(&path, file.render(&generated)?)
        .with_context(|| format!("Could not write {}", path.display()))?;

    let (explicit, forget) = file.packages.values().fold((0, 0), |(e, f), table| {
        (e + table.explicit.len(), f + table.forget.len())
    });
    ui::success(&format!(
        "Wrote {}: {explicit} untracked, {forget} missing",
        path.display()
    ));
    Ok(ExitCode::SUCCESS)
}
