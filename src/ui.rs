use colored::Colorize;
use reconcile::{
    Action, ActionKind, ActionOutcome, Advisory, BackendId, OverallStatus, ReportEntry,
    ResultReport,
};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plan and report rendering
// ============================================================================

fn marker(kind: ActionKind) -> colored::ColoredString {
    match kind {
        ActionKind::Install => "+".green().bold(),
        ActionKind::Remove => "-".red().bold(),
        ActionKind::MarkExplicit | ActionKind::MarkImplicit => "~".yellow().bold(),
    }
}

/// Print actions grouped by manager, in execution order
pub fn actions(actions: &[&Action]) {
    if actions.is_empty() {
        success("Everything is in sync");
        return;
    }

    let mut current: Option<&BackendId> = None;
    for action in actions {
        if current != Some(action.backend()) {
            section(action.backend().as_str());
            current = Some(action.backend());
        }
        println!(
            "  {} {:<14} {} {}",
            marker(action.kind),
            action.kind.label(),
            action.package.name,
            format!("({})", action.reason).dimmed()
        );
    }
}

/// Print advisories: untracked packages, unavailable managers and the rest
pub fn advisories(advisories: &[Advisory]) {
    let untracked: Vec<_> = advisories
        .iter()
        .filter_map(|a| match a {
            Advisory::Untracked { package } => Some(package),
            _ => None,
        })
        .collect();

    for advisory in advisories {
        if !matches!(advisory, Advisory::Untracked { .. }) {
            warn(&advisory.to_string());
        }
    }

    if !untracked.is_empty() {
        section(&format!("Untracked ({})", untracked.len()));
        dim("Installed explicitly but not declared. Run `pkgsync save` to record them.");
        for package in untracked {
            println!("  {} {}", "?".blue(), package);
        }
    }
}

fn entry_line(entry: &ReportEntry) -> String {
    let action = &entry.action;
    match &entry.outcome {
        ActionOutcome::Applied => format!("{} {}", "✓".green(), action),
        ActionOutcome::Skipped { reason } => {
            format!("{} {} {}", "○".dimmed(), action, format!("({reason})").dimmed())
        }
        ActionOutcome::Failed { error } => format!("{} {}: {}", "✗".red(), action, error.red()),
    }
}

/// Print per-action outcomes and the summary line
pub fn report(report: &ResultReport, verbose: bool) {
    if let Some(reason) = &report.abort_reason {
        error(&format!("Aborted: {reason}"));
    }

    let dry_run = report
        .entries
        .iter()
        .all(|e| matches!(&e.outcome, ActionOutcome::Skipped { reason } if reason == "dry-run"));

    if dry_run {
        // Nothing ran: show the plan itself
        if report.abort_reason.is_none() {
            let planned: Vec<&Action> = report.entries.iter().map(|e| &e.action).collect();
            actions(&planned);
        }
    } else {
        for entry in &report.entries {
            // Applied actions only in verbose mode, everything else always
            if verbose || !entry.outcome.is_applied() {
                println!("  {}", entry_line(entry));
            }
        }
    }

    advisories(&report.advisories);
    summary(report);
}

/// Print the summary line for a report
pub fn summary(report: &ResultReport) {
    let s = report.summary();
    println!();
    let counts = format!(
        "{} installed, {} removed, {} re-marked, {} skipped, {} failed",
        s.installed, s.removed, s.marked, s.skipped, s.failed
    );
    match report.status() {
        OverallStatus::FullySucceeded => success(&counts),
        OverallStatus::PartiallyFailed => warn(&format!("Partially failed: {counts}")),
        OverallStatus::Aborted if report.cancelled => warn(&format!("Interrupted: {counts}")),
        OverallStatus::Aborted => error(&format!("Aborted: {counts}")),
    }
}

/// Print the report as pretty JSON
pub fn json(report: &ResultReport) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct Output<'a> {
        status: OverallStatus,
        summary: reconcile::ReportSummary,
        #[serde(flatten)]
        report: &'a ResultReport,
    }

    let output = Output {
        status: report.status(),
        summary: report.summary(),
        report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::PackageRef;

    fn entry(outcome: ActionOutcome) -> ReportEntry {
        ReportEntry {
            action: Action::new(ActionKind::Install, PackageRef::new("pacman", "git"), "declared"),
            outcome,
        }
    }

    #[test]
    fn test_entry_line_mentions_action_and_reason() {
        colored::control::set_override(false);

        assert_eq!(entry_line(&entry(ActionOutcome::Applied)), "✓ install pacman/git");
        assert_eq!(
            entry_line(&entry(ActionOutcome::skipped("declined"))),
            "○ install pacman/git (declined)"
        );
        assert_eq!(
            entry_line(&entry(ActionOutcome::failed("target not found: git"))),
            "✗ install pacman/git: target not found: git"
        );
    }

    #[test]
    fn test_json_output_has_status() {
        let report = ResultReport {
            entries: vec![entry(ActionOutcome::Applied)],
            ..ResultReport::default()
        };
        let output = serde_json::json!({
            "status": report.status(),
            "entries": report.entries,
        });
        assert_eq!(output["status"], "fully-succeeded");
        assert_eq!(output["entries"][0]["outcome"], "applied");
    }
}
