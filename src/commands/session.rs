//! `pkgsync diff` and `pkgsync apply`

use crate::Context;
use crate::backends;
use crate::cli::{ApplyArgs, SessionArgs};
use crate::config::Config;
use crate::interrupt;
use crate::prompt::{Spinners, TerminalConfirm};
use crate::sudo::SudoContext;
use crate::ui;
use anyhow::Result;
use reconcile::{AutoConfirm, AutoDecline, ConfirmCallback, Mode, ProgressCallback, Session};
use std::process::ExitCode;

/// Preview what apply would change
pub fn diff(ctx: &Context, args: SessionArgs) -> Result<ExitCode> {
    run(ctx, &args, Mode::Preview, false)
}

/// Bring the machine in line with the config
pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let mode = if args.dry_run {
        Mode::Preview
    } else {
        Mode::Apply {
            assume_yes: args.yes,
        }
    };
    run(ctx, &args.session, mode, args.paranoid)
}

fn run(ctx: &Context, args: &SessionArgs, mode: Mode, paranoid: bool) -> Result<ExitCode> {
    let config = super::load_config(ctx)?;
    let mut options = super::session_options(&config.settings, args, mode);
    options.paranoid = paranoid;

    let session = Session::new(backends::build(&config)?, options).with_cancel(interrupt::install());
    let spinners = Spinners::new(ctx.quiet || ctx.json);

    if mode == Mode::Preview && !ctx.json && !ctx.quiet {
        ui::warn("Dry run - no changes will be made");
    }

    let _sudo = match mode {
        Mode::Apply { .. } => acquire_sudo(&config, &session, &spinners)?,
        Mode::Preview => None,
    };

    let mut confirm = confirm_callback(ctx, mode);
    let report = session.run(&config.desired, confirm.as_mut(), &spinners)?;
    drop(spinners);

    if ctx.json {
        ui::json(&report)?;
    } else {
        ui::report(&report, ctx.verbose > 0);
    }

    Ok(ExitCode::from(report.status().exit_code()))
}

fn confirm_callback(ctx: &Context, mode: Mode) -> Box<dyn ConfirmCallback> {
    match mode {
        Mode::Apply { assume_yes: true } => Box::new(AutoConfirm),
        // Prompts would interleave with the JSON document
        Mode::Apply { assume_yes: false } if ctx.json => {
            log::warn!("--json without --yes: declining all changes");
            Box::new(AutoDecline)
        }
        Mode::Apply { assume_yes: false } => Box::new(TerminalConfirm::new()),
        Mode::Preview => Box::new(AutoDecline),
    }
}

/// Prompt for the sudo password once if the plan touches a privileged manager
///
/// Snapshots are cached per session, so planning here does not query the
/// managers a second time.
fn acquire_sudo(
    config: &Config,
    session: &Session,
    progress: &dyn ProgressCallback,
) -> Result<Option<SudoContext>> {
    let privileged = config.sudo_managers();
    if privileged.is_empty() {
        return Ok(None);
    }

    let plan = match session.plan(&config.desired, progress) {
        Ok(plan) => plan,
        Err(e) => {
            // The session reports this properly
            log::debug!("Skipping sudo check: {e}");
            return Ok(None);
        }
    };

    let mut touched: Vec<&str> = plan
        .actions
        .iter()
        .map(|a| a.backend().as_str())
        .filter(|b| privileged.contains(b))
        .collect();
    touched.dedup();
    if touched.is_empty() {
        return Ok(None);
    }

    SudoContext::acquire(&format!("{} requires root", touched.join(", "))).map(Some)
}
