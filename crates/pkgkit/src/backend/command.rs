//! Backend defined entirely by shell command templates.

use crate::backend::{apply_batch, parse_package_lines};
use crate::command::{CommandTemplate, run_shell};
use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use reconcile::{ApplyOrder, Backend, BackendId, BatchOutcome, CallBudget, Capabilities, PackageRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Raw command definition, as written in a manager table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Lists every installed package, one per line
    pub list_cmd: String,
    /// Lists user-requested packages; absent means no explicit tracking
    pub list_explicit_cmd: Option<String>,
    pub install_cmd: Option<String>,
    pub remove_cmd: Option<String>,
    pub mark_explicit_cmd: Option<String>,
    pub mark_implicit_cmd: Option<String>,
    /// Regex with a `name` group (and optional `version` group)
    pub list_regex: Option<String>,
    /// One command for all packages instead of one per package
    pub supports_multi_pkgs: bool,
    /// Exit codes counted as success; empty means `[0]`
    #[serde(rename = "success_ret_code")]
    pub success_codes: Vec<i32>,
    pub order: ApplyOrder,
}

impl CommandSpec {
    pub fn new(list_cmd: impl Into<String>) -> Self {
        Self {
            list_cmd: list_cmd.into(),
            ..Self::default()
        }
    }
}

/// Adapter running user-configured shell commands
#[derive(Debug)]
pub struct CommandBackend {
    id: BackendId,
    list_cmd: String,
    list_explicit_cmd: Option<String>,
    install: Option<CommandTemplate>,
    remove: Option<CommandTemplate>,
    mark_explicit: Option<CommandTemplate>,
    mark_implicit: Option<CommandTemplate>,
    pattern: Option<Regex>,
    multi: bool,
    success_codes: Vec<i32>,
    order: ApplyOrder,
    retry: RetryConfig,
}

impl CommandBackend {
    /// Validate templates and compile the list regex.
    pub fn new(id: impl Into<BackendId>, spec: CommandSpec) -> Result<Self> {
        let id = id.into();
        if spec.list_cmd.trim().is_empty() {
            return Err(Error::InvalidTemplate {
                template: String::new(),
                reason: "list_cmd is required".to_string(),
            });
        }

        let template = |script: Option<String>| script.as_deref().map(CommandTemplate::parse).transpose();
        let mark_explicit = template(spec.mark_explicit_cmd)?;
        let mark_implicit = template(spec.mark_implicit_cmd)?;
        if mark_explicit.is_some() != mark_implicit.is_some() {
            log::warn!("{id}: marking needs both mark_explicit_cmd and mark_implicit_cmd, disabling it");
        }
        let (mark_explicit, mark_implicit) = match (mark_explicit, mark_implicit) {
            (Some(e), Some(i)) => (Some(e), Some(i)),
            _ => (None, None),
        };

        let pattern = spec.list_regex.as_deref().map(Regex::new).transpose()?;
        if let Some(re) = &pattern
            && !re.capture_names().flatten().any(|n| n == "name")
        {
            return Err(Error::InvalidTemplate {
                template: re.as_str().to_string(),
                reason: "list_regex needs a 'name' group".to_string(),
            });
        }

        Ok(Self {
            list_cmd: spec.list_cmd.trim().to_string(),
            list_explicit_cmd: spec.list_explicit_cmd.filter(|c| !c.trim().is_empty()),
            install: template(spec.install_cmd)?,
            remove: template(spec.remove_cmd)?,
            mark_explicit,
            mark_implicit,
            pattern,
            multi: spec.supports_multi_pkgs,
            success_codes: if spec.success_codes.is_empty() {
                vec![0]
            } else {
                spec.success_codes
            },
            order: spec.order,
            retry: RetryConfig::default(),
            id,
        })
    }

    /// Override the retry policy for mutations.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn list(&self, script: &str, timeout: Duration, operation: &str) -> reconcile::Result<BTreeSet<PackageRef>> {
        run_shell(script, timeout)
            .and_then(|output| output.check(script, &self.success_codes))
            .and_then(|output| parse_package_lines(&self.id, &output.stdout, self.pattern.as_ref()))
            .map_err(|e| e.into_backend_error(&self.id, operation))
    }

    fn mutate(
        &self,
        template: Option<&CommandTemplate>,
        capability: &'static str,
        packages: &[PackageRef],
        budget: &CallBudget,
        arg: fn(&PackageRef) -> String,
    ) -> reconcile::Result<BatchOutcome> {
        let Some(template) = template else {
            return Err(reconcile::Error::Unsupported {
                backend: self.id.clone(),
                capability,
            });
        };

        Ok(apply_batch(
            &self.id,
            capability,
            packages,
            self.multi,
            &self.retry,
            budget,
            |batch, left| {
                let args: Vec<String> = batch.iter().map(arg).collect();
                let script = template.render(&args);
                run_shell(&script, left)?.check(&script, &self.success_codes)?;
                Ok(())
            },
        ))
    }
}

impl Backend for CommandBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            explicit_tracking: self.list_explicit_cmd.is_some(),
            install: self.install.is_some(),
            remove: self.remove.is_some(),
            mark: self.mark_explicit.is_some(),
            order: self.order,
        }
    }

    fn is_available(&self) -> bool {
        crate::command::program_of(&self.list_cmd).is_some_and(|p| which::which(p).is_ok())
    }

    fn list_installed(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        self.list(&self.list_cmd, timeout, "list installed")
    }

    fn list_explicit(&self, timeout: Duration) -> reconcile::Result<BTreeSet<PackageRef>> {
        match &self.list_explicit_cmd {
            Some(script) => self.list(script, timeout, "list explicit"),
            None => Ok(BTreeSet::new()),
        }
    }

    fn install(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mutate(self.install.as_ref(), "install", packages, budget, PackageRef::install_arg)
    }

    fn remove(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mutate(self.remove.as_ref(), "remove", packages, budget, |p| p.name.clone())
    }

    fn mark_explicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mutate(
            self.mark_explicit.as_ref(),
            "mark-explicit",
            packages,
            budget,
            |p| p.name.clone(),
        )
    }

    fn mark_implicit(&self, packages: &[PackageRef], budget: &CallBudget) -> reconcile::Result<BatchOutcome> {
        self.mutate(
            self.mark_implicit.as_ref(),
            "mark-implicit",
            packages,
            budget,
            |p| p.name.clone(),
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use reconcile::CancelToken;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn budget() -> CallBudget {
        CallBudget::with_timeout(TIMEOUT)
    }

    /// Fake package manager keeping its database as one file per package
    fn fake_manager(dir: &Path) -> CommandSpec {
        let db = dir.join("db");
        fs::create_dir_all(&db).unwrap();
        let db = db.display();
        CommandSpec {
            list_cmd: format!("ls {db}"),
            install_cmd: Some(format!(
                "for p in {{}}; do case $p in bad*) echo \"error: target not found: $p\" >&2; exit 1;; esac; done; cd {db} && touch {{}}"
            )),
            remove_cmd: Some(format!("cd {db} && rm -f {{}}")),
            supports_multi_pkgs: true,
            ..CommandSpec::new("")
        }
    }

    fn refs(names: &[&str]) -> Vec<PackageRef> {
        names.iter().map(|n| PackageRef::new("fake", *n)).collect()
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let spec = CommandSpec {
            install_cmd: Some("pip install".to_string()),
            ..CommandSpec::new("pip list")
        };
        let err = CommandBackend::new("pip", spec).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate { .. }));
    }

    #[test]
    fn test_rejects_regex_without_name_group() {
        let spec = CommandSpec {
            list_regex: Some(r"^(\S+)".to_string()),
            ..CommandSpec::new("pip list")
        };
        assert!(CommandBackend::new("pip", spec).is_err());
    }

    #[test]
    fn test_capabilities_follow_configured_commands() {
        let spec = CommandSpec {
            list_explicit_cmd: Some("pacman -Qqe".to_string()),
            install_cmd: Some("pacman -S {}".to_string()),
            mark_explicit_cmd: Some("pacman -D --asexplicit {}".to_string()),
            ..CommandSpec::new("pacman -Qq")
        };
        let backend = CommandBackend::new("pacman", spec).unwrap();
        let caps = backend.capabilities();

        assert!(caps.explicit_tracking);
        assert!(caps.install);
        assert!(!caps.remove);
        // Only one of the two mark commands is configured
        assert!(!caps.mark);
    }

    #[test]
    fn test_install_and_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = CommandBackend::new("fake", fake_manager(dir.path()))
            .unwrap()
            .with_retry(RetryConfig::no_retry());

        let outcome = backend.install(&refs(&["git", "vim"]), &budget()).unwrap();
        assert!(outcome.is_success());

        let installed = backend.list_installed(TIMEOUT).unwrap();
        assert_eq!(installed, refs(&["git", "vim"]).into_iter().collect());
        // No list_explicit_cmd: no explicit tracking
        assert!(backend.list_explicit(TIMEOUT).unwrap().is_empty());
    }

    #[test]
    fn test_batch_failure_attributed() {
        let dir = TempDir::new().unwrap();
        let backend = CommandBackend::new("fake", fake_manager(dir.path()))
            .unwrap()
            .with_retry(RetryConfig::no_retry());

        let outcome = backend.install(&refs(&["git", "badpkg", "vim"]), &budget()).unwrap();

        assert_eq!(outcome.succeeded, refs(&["git", "vim"]));
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0.name, "badpkg");
        assert!(outcome.failed[0].1.contains("target not found"));
    }

    #[test]
    fn test_remove_absent_is_success() {
        let dir = TempDir::new().unwrap();
        let backend = CommandBackend::new("fake", fake_manager(dir.path())).unwrap();

        let outcome = backend.remove(&refs(&["never-installed"]), &budget()).unwrap();
        assert!(outcome.is_success());
    }

    /// Manager whose every install takes `secs` and leaves a marker file
    fn slow_manager(dir: &Path, secs: &str) -> CommandBackend {
        let spec = CommandSpec {
            install_cmd: Some(format!("sleep {secs}; cd {} && touch {{}}", dir.display())),
            ..CommandSpec::new("true")
        };
        CommandBackend::new("fake", spec)
            .unwrap()
            .with_retry(RetryConfig::no_retry())
    }

    #[test]
    fn test_timeout_covers_whole_call() {
        let dir = TempDir::new().unwrap();
        let backend = slow_manager(dir.path(), "0.4");
        let started = Instant::now();

        let outcome = backend
            .install(
                &refs(&["a", "b", "c"]),
                &CallBudget::with_timeout(Duration::from_millis(500)),
            )
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(matches!(
            outcome.fault,
            Some(reconcile::Error::BackendTimeout { timeout, .. })
                if timeout == Duration::from_millis(500)
        ));
        assert_eq!(outcome.succeeded, refs(&["a"]));
        assert!(!dir.path().join("c").exists());
    }

    #[test]
    fn test_cancel_stops_remaining_packages() {
        let dir = TempDir::new().unwrap();
        let backend = slow_manager(dir.path(), "0.3");
        let token = CancelToken::new();
        let budget = CallBudget::new(TIMEOUT, token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(450));
            token.cancel();
        });

        let outcome = backend.install(&refs(&["p1", "p2", "p3", "p4"]), &budget).unwrap();
        canceller.join().unwrap();

        // p2 is in flight when the token fires and runs to completion
        assert_eq!(outcome.succeeded, refs(&["p1", "p2"]));
        assert_eq!(outcome.cancelled, refs(&["p3", "p4"]));
        assert!(outcome.fault.is_none());
        assert!(dir.path().join("p2").exists());
        assert!(!dir.path().join("p3").exists());
    }

    #[test]
    fn test_custom_success_codes() {
        let spec = CommandSpec {
            success_codes: vec![0, 1],
            ..CommandSpec::new("echo git; exit 1")
        };
        let backend = CommandBackend::new("fake", spec).unwrap();
        let installed = backend.list_installed(TIMEOUT).unwrap();
        assert!(installed.contains(&PackageRef::new("fake", "git")));
    }

    #[test]
    fn test_missing_command_is_unsupported() {
        let backend = CommandBackend::new("fake", CommandSpec::new("true")).unwrap();
        let err = backend.install(&refs(&["git"]), &budget()).unwrap_err();
        assert!(err.is_unsupported());
        let err = backend.mark_implicit(&refs(&["git"]), &budget()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_failing_list_is_unavailable() {
        let backend = CommandBackend::new("fake", CommandSpec::new("echo broken >&2; exit 2")).unwrap();
        let err = backend.list_installed(TIMEOUT).unwrap_err();
        assert!(err.is_adapter_fault());
    }

    #[test]
    fn test_list_timeout() {
        let backend = CommandBackend::new("fake", CommandSpec::new("sleep 5")).unwrap();
        let err = backend.list_installed(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, reconcile::Error::BackendTimeout { .. }));
    }

    #[test]
    fn test_is_available_probes_first_program() {
        let present = CommandBackend::new("fake", CommandSpec::new("sh -c 'true'")).unwrap();
        assert!(present.is_available());
        let missing = CommandBackend::new("fake", CommandSpec::new("pkgsync-missing-tool list")).unwrap();
        assert!(!missing.is_available());
    }
}
