//! Subprocess execution with deadlines.
//!
//! Every package manager call goes through [`run`]: stdin is closed so a
//! prompting tool cannot hang the session, both output streams are drained
//! on their own threads, and the child is killed once the deadline passes.

use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Placeholder replaced by package arguments in a template
pub const PLACEHOLDER: &str = "{}";

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the exit code is one of `success_codes`
    pub fn succeeded(&self, success_codes: &[i32]) -> bool {
        self.code.is_some_and(|c| success_codes.contains(&c))
    }

    /// Turn a non-successful exit into a categorized error
    pub fn check(self, command: &str, success_codes: &[i32]) -> Result<Self> {
        if self.succeeded(success_codes) {
            Ok(self)
        } else {
            Err(Error::from_command_output(
                command,
                self.code,
                &self.stderr,
                &self.stdout,
            ))
        }
    }
}

/// Shell command with a `{}` slot for package arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    script: String,
}

impl CommandTemplate {
    /// Parse a template, rejecting scripts without a placeholder.
    pub fn parse(script: &str) -> Result<Self> {
        let trimmed = script.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidTemplate {
                template: script.to_string(),
                reason: "command is empty".to_string(),
            });
        }
        if !trimmed.contains(PLACEHOLDER) {
            return Err(Error::InvalidTemplate {
                template: script.to_string(),
                reason: format!("missing '{PLACEHOLDER}' placeholder for package arguments"),
            });
        }
        Ok(Self {
            script: trimmed.to_string(),
        })
    }

    /// Substitute the space-joined arguments into every placeholder.
    pub fn render<S: AsRef<str>>(&self, args: &[S]) -> String {
        let joined = args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(" ");
        self.script.replace(PLACEHOLDER, &joined)
    }

    /// First word of the script, used for availability probes
    pub fn program(&self) -> Option<&str> {
        program_of(&self.script)
    }

    pub fn as_str(&self) -> &str {
        &self.script
    }
}

/// First word of a shell script, skipping `sudo` and env assignments
pub fn program_of(script: &str) -> Option<&str> {
    script
        .split_whitespace()
        .find(|word| *word != "sudo" && !word.contains('='))
}

/// Run a program with arguments, killing it after `timeout`.
pub fn run(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let display = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let mut command = Command::new(program);
    command.args(args);
    execute(&mut command, &display, timeout)
}

/// Run a script through `sh -c`, killing it after `timeout`.
pub fn run_shell(script: &str, timeout: Duration) -> Result<CommandOutput> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    let output = execute(&mut command, script, timeout)?;

    // sh reports a missing program as 127
    if output.code == Some(127)
        && let Some(program) = program_of(script)
        && which::which(program).is_err()
    {
        return Err(Error::ProgramNotFound {
            program: program.to_string(),
        });
    }
    Ok(output)
}

fn execute(command: &mut Command, display: &str, timeout: Duration) -> Result<CommandOutput> {
    log::debug!("Running: {display}");

    // Keep the terminal's SIGINT away from the package manager, so an
    // interrupt never kills it halfway through a transaction
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ProgramNotFound {
                program: display
                    .split_whitespace()
                    .next()
                    .unwrap_or(display)
                    .to_string(),
            },
            _ => Error::Spawn {
                command: display.to_string(),
                source: e,
            },
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            kill(&mut child);
            log::warn!("Killed '{display}' after {:.1}s", timeout.as_secs_f64());
            return Err(Error::Timeout {
                command: display.to_string(),
                timeout,
            });
        }
    };

    let output = CommandOutput {
        code: status.code(),
        stdout: join(stdout),
        stderr: join(stderr),
    };
    log::trace!("'{display}' exited with {:?}", output.code);
    Ok(output)
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<String>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_requires_placeholder() {
        let err = CommandTemplate::parse("pacman -S --noconfirm").unwrap_err();
        assert!(err.to_string().contains("missing '{}' placeholder"));
        assert!(CommandTemplate::parse("   ").is_err());
    }

    #[test]
    fn test_template_render() {
        let template = CommandTemplate::parse("pip install --user {}").unwrap();
        assert_eq!(
            template.render(&["httpie", "black"]),
            "pip install --user httpie black"
        );
        assert_eq!(template.program(), Some("pip"));
    }

    #[test]
    fn test_program_of_skips_sudo_and_env() {
        assert_eq!(program_of("sudo pacman -S {}"), Some("pacman"));
        assert_eq!(program_of("LANG=C apt-get install {}"), Some("apt-get"));
        assert_eq!(program_of(""), None);
    }

    #[test]
    fn test_succeeded_with_custom_codes() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!output.succeeded(&[0]));
        assert!(output.succeeded(&[0, 1]));

        let killed = CommandOutput { code: None, ..output };
        assert!(!killed.succeeded(&[0, 1]));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_captures_output() {
        let output = run_shell("echo out; echo err >&2; exit 3", Duration::from_secs(10)).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_times_out() {
        let err = run_shell("sleep 5", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_adapter_fault());
    }

    #[test]
    fn test_run_missing_program() {
        let err = run("pkgsync-definitely-missing", &[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::ProgramNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_missing_program() {
        let err = run_shell("pkgsync-definitely-missing {}", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, Error::ProgramNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_categorizes_failure() {
        let output = run_shell(
            "echo 'error: target not found: nope' >&2; exit 1",
            Duration::from_secs(10),
        )
        .unwrap();
        let err = output.check("pacman -S nope", &[0]).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::NotFound);
    }
}
