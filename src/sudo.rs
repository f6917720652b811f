//! Sudo session for privileged package managers
//!
//! Adapters run privileged commands with `sudo -n` so they never prompt in
//! the middle of a batch. `SudoContext` asks for the password once, up front,
//! and invalidates the cached credentials when dropped.

use anyhow::{Result, bail};
use colored::Colorize;
use std::io::IsTerminal;
use std::process::{Command, Stdio};

/// Holds sudo credentials for the duration of an apply
pub struct SudoContext {
    /// Whether we prompted (and so own the cached timestamp)
    prompted: bool,
}

impl SudoContext {
    /// Make sure `sudo -n` will succeed, prompting once if needed.
    pub fn acquire(reason: &str) -> Result<Self> {
        if Self::is_valid() {
            log::debug!("sudo credentials already cached");
            return Ok(Self { prompted: false });
        }

        if !std::io::stdin().is_terminal() {
            bail!("{reason} needs sudo, but stdin is not a terminal (run `sudo -v` first)");
        }

        println!();
        println!("  {} {}", "🔐".yellow(), reason.bold());
        println!();

        let status = Command::new("sudo")
            .arg("-v")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        if !status.success() {
            bail!("Failed to acquire sudo privileges");
        }

        Ok(Self { prompted: true })
    }

    /// Check if sudo is currently valid (without prompting)
    pub fn is_valid() -> bool {
        Command::new("sudo")
            .args(["-n", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl Drop for SudoContext {
    fn drop(&mut self) {
        if self.prompted {
            // Invalidate sudo timestamp to release privileges
            let _ = Command::new("sudo").arg("-k").status();
        }
    }
}
