pub mod check;
pub mod save;
pub mod session;

use crate::Context;
use crate::cli::SessionArgs;
use crate::config::{Config, Settings};
use crate::paths;
use anyhow::Result;
use reconcile::{Mode, SessionOptions};
use std::time::Duration;

/// Load the merged config from the resolved config directory
pub fn load_config(ctx: &Context) -> Result<Config> {
    let dir = paths::config_dir(ctx.config_dir.as_deref())?;
    Config::load(&dir)
}

/// Session options from `[settings]`, overridden by command-line flags
pub fn session_options(settings: &Settings, args: &SessionArgs, mode: Mode) -> SessionOptions {
    let jobs = if args.sync {
        1
    } else {
        args.jobs.unwrap_or(settings.jobs)
    };
    let query_timeout = args.timeout.unwrap_or(settings.query_timeout_secs);
    let apply_timeout = args.timeout.unwrap_or(settings.apply_timeout_secs);

    SessionOptions {
        mode,
        strict: args.strict || settings.strict,
        paranoid: false,
        query_timeout: Duration::from_secs(query_timeout),
        apply_timeout: Duration::from_secs(apply_timeout),
        jobs: jobs.max(1),
        demote_untracked: settings.demote_untracked,
        verify: settings.verify,
        target: args.target.clone(),
    }
}
